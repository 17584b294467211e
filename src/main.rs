use std::{process, sync::Arc};

use serde::Serialize;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;
use zcache::{
    application::{
        error::{AppError, ErrorReport},
        prefix_index::{MatchWindow, PrefixIndex, PrefixIndexOptions, PrefixOp},
        unique_count::{UniqueCountOptions, UniqueCounter},
    },
    cache::{CacheConfig, CombinationCache, HostProcessTask, KeyHasher, Query, SetQueries},
    config::{
        self, CombineArgs, Command, IndexArgs, IndexCommand, LoadError, ScoreArgs, Settings,
        UniquesArgs, UniquesCommand,
    },
    domain::granularity::utc_now,
    infra::{error::InfraError, redis::RedisStore, telemetry},
    store::{BitmapStore, SortedSetStore},
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let report = ErrorReport::from_error("zcache::main", error);
    if dispatcher::has_been_set() {
        error!(error = %error, causes = ?report.messages, source = report.source, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, causes = ?report.messages, source = report.source, "application error");
    });
}

/// Both store facets behind one connection.
struct Stores {
    sorted_sets: Arc<dyn SortedSetStore>,
    bitmaps: Arc<dyn BitmapStore>,
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| match err {
        LoadError::Invalid { .. } => AppError::validation(err.to_string()),
        LoadError::Build(_) => AppError::from(InfraError::configuration(err.to_string())),
    })?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let stores = connect(&settings).await?;
    let queries = build_queries(&settings, stores.sorted_sets.clone());

    match cli_args.command {
        Command::Count(args) => {
            let query = build_query(&args.combine, &args.scores).count();
            print_json(&queries.fetch(&query).await?)
        }
        Command::Range(args) => {
            let mut query = build_query(&args.combine, &args.scores)
                .window(args.start, args.end)
                .reverse(!args.ascending)
                .with_scores(args.with_scores);
            if let Some(retries) = args.retries {
                query = query.retries(retries);
            }
            print_json(&queries.fetch(&query).await?)
        }
        Command::Key(args) => {
            let query = build_query(&args.combine, &ScoreArgs::default()).return_key();
            print_json(&queries.fetch(&query).await?)
        }
        Command::Index(args) => run_index(&settings, queries, args).await,
        Command::Uniques(args) => run_uniques(&settings, stores.bitmaps, args).await,
    }
}

async fn connect(settings: &Settings) -> Result<Stores, AppError> {
    let store = RedisStore::connect(&settings.store.url)
        .await
        .map_err(InfraError::from)?;
    let store = Arc::new(store);
    info!(url = %settings.store.url, "Store connected");
    Ok(Stores {
        sorted_sets: store.clone(),
        bitmaps: store,
    })
}

fn build_queries(settings: &Settings, store: Arc<dyn SortedSetStore>) -> SetQueries {
    let config = CacheConfig::from(&settings.cache);
    let hasher = KeyHasher::new(config.key_prefix.clone(), Arc::new(HostProcessTask));
    SetQueries::new(CombinationCache::new(store, hasher, config))
}

fn build_query(combine: &CombineArgs, scores: &ScoreArgs) -> Query {
    let mut query = Query::new(combine.bind.iter().cloned())
        .operator(combine.operator)
        .aggregate(combine.aggregate)
        .ttl(combine.ttl)
        .cachebust(combine.cachebust);
    if combine.thread_local {
        query = query.thread_local(true);
    }
    if let Some(min) = scores.min {
        query = query.min_score(min);
    }
    if let Some(max) = scores.max {
        query = query.max_score(max);
    }
    query
}

async fn run_index(
    settings: &Settings,
    queries: SetQueries,
    args: IndexArgs,
) -> Result<(), AppError> {
    let index = PrefixIndex::new(
        queries,
        args.index,
        PrefixIndexOptions::from(&settings.prefix_index),
    );
    match args.command {
        IndexCommand::Add(entry) => {
            let touched = index
                .build(&entry.text, &entry.id, entry.min_prefix, PrefixOp::Add, &entry.sort)
                .await?;
            print_json(&touched)
        }
        IndexCommand::Remove(entry) => {
            let touched = index
                .build(&entry.text, &entry.id, entry.min_prefix, PrefixOp::Remove, &entry.sort)
                .await?;
            print_json(&touched)
        }
        IndexCommand::Match(matching) => {
            let window = MatchWindow {
                start: matching.start,
                end: matching.end,
                with_scores: matching.with_scores,
                ttl: matching.ttl,
            };
            print_json(&index.matches(&matching.query, window).await?)
        }
    }
}

async fn run_uniques(
    settings: &Settings,
    store: Arc<dyn BitmapStore>,
    args: UniquesArgs,
) -> Result<(), AppError> {
    let counter = UniqueCounter::new(store, UniqueCountOptions::from(&settings.unique_count));
    let namespace = args.namespace.as_str();
    match args.command {
        UniquesCommand::Track(track) => {
            let at = track.at.unwrap_or_else(utc_now);
            counter
                .track_event(&track.event, &track.id, namespace, at)
                .await?;
            print_json(&counter.map_id_to_offset(&track.id, namespace).await?)
        }
        UniquesCommand::Count(count) => {
            let total = counter
                .count(count.from, count.to, &count.event, namespace)
                .await?;
            print_json(&total)
        }
        UniquesCommand::Ids(ids) => {
            let at = ids.at.unwrap_or_else(utc_now);
            print_json(&counter.ids_for_event(&ids.event, namespace, at).await?)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
