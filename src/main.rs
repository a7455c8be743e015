use std::{path::Path, process, sync::Arc};

use threadline::{
    application::{
        comments::{CreateCommentCommand, ExportScope, NotificationChannels},
        error::AppError,
        pagination::PageRequest,
        render::{ContentRenderer, RenderCacheConfig},
    },
    config,
    infra::{bootstrap::Engine, http, settings::InMemorySettings, telemetry},
};
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    let log = || {
        for (depth, message) in report.messages.iter().enumerate() {
            error!(source = report.source, depth, error = %message, "application error");
        }
    };

    if dispatcher::has_been_set() {
        log();
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, log);
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let renderer = Arc::new(ContentRenderer::new(RenderCacheConfig::from(
        &settings.render,
    )));

    let site_settings = Arc::new(InMemorySettings::with_values(cli_args.site_settings));

    match cli_args.command {
        config::Command::Render(args) => run_render(&renderer, args).await,
        config::Command::Thread(args) => run_thread(&settings, renderer, args).await,
        config::Command::Pack(args) => run_pack(&settings, renderer, args).await,
        config::Command::Submit(args) => {
            run_submit(&settings, renderer, site_settings, args).await
        }
        config::Command::Qq(args) => run_qq(&settings, renderer, site_settings, args).await,
    }
}

async fn read_input(path: &Path) -> Result<String, AppError> {
    if path.as_os_str() == "-" {
        let mut buffer = String::new();
        tokio::io::stdin().read_to_string(&mut buffer).await?;
        Ok(buffer)
    } else {
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to encode output: {err}")))?;
    println!("{json}");
    Ok(())
}

async fn run_render(renderer: &ContentRenderer, args: config::RenderArgs) -> Result<(), AppError> {
    let markdown = read_input(&args.file).await?;
    println!("{}", renderer.to_html(&markdown));
    Ok(())
}

async fn run_thread(
    settings: &config::Settings,
    renderer: Arc<ContentRenderer>,
    args: config::ThreadArgs,
) -> Result<(), AppError> {
    let engine = Engine::new(settings, renderer, NotificationChannels::default());
    load_bundle(&engine, &args.bundle).await?;

    let page_size = args
        .page_size
        .unwrap_or_else(|| settings.comments.page_size.get());
    let page = engine
        .service
        .thread(&args.path, PageRequest::new(args.page, page_size))
        .await?;
    engine.shutdown().await;

    print_json(&page)
}

async fn run_pack(
    settings: &config::Settings,
    renderer: Arc<ContentRenderer>,
    args: config::PackArgs,
) -> Result<(), AppError> {
    let engine = Engine::new(settings, renderer, NotificationChannels::default());
    load_bundle(&engine, &args.bundle).await?;
    let result = write_archive(&engine, &args.out).await;
    engine.shutdown().await;
    result
}

async fn run_submit(
    settings: &config::Settings,
    renderer: Arc<ContentRenderer>,
    site_settings: Arc<InMemorySettings>,
    args: config::SubmitArgs,
) -> Result<(), AppError> {
    let content = if args.content == "-" {
        read_input(Path::new("-")).await?
    } else {
        args.content
    };

    let client = http::build_client(settings.http.timeout)?;
    let engine = Engine::connected(settings, renderer, client, site_settings);
    if let Some(bundle) = args.bundle.as_deref() {
        load_bundle(&engine, bundle).await?;
    }

    let command = CreateCommentCommand {
        target_path: args.path,
        reply_to_id: args.reply_to.or_else(|| args.parent.clone()),
        parent_id: args.parent,
        nickname: args.nickname,
        email: args.email,
        website: args.website,
        content,
        allow_notification: true,
        ip_address: args.ip,
        user_agent: Some(http::user_agent().to_string()),
        ..Default::default()
    };
    let created = engine.service.create(command, None).await;
    let written = match (&created, args.out.as_deref()) {
        (Ok(_), Some(out)) => write_archive(&engine, out).await,
        _ => Ok(()),
    };

    let abandoned = engine.shutdown().await;
    if abandoned > 0 {
        warn!(
            target = "threadline::submit",
            abandoned, "Notifications left undelivered"
        );
    }

    let view = created?;
    written?;
    print_json(&view)
}

async fn run_qq(
    settings: &config::Settings,
    renderer: Arc<ContentRenderer>,
    site_settings: Arc<InMemorySettings>,
    args: config::QqArgs,
) -> Result<(), AppError> {
    let client = http::build_client(settings.http.timeout)?;
    let engine = Engine::connected(settings, renderer, client, site_settings);
    let profile = engine.service.lookup_qq_profile(&args.number).await;
    engine.shutdown().await;

    print_json(&profile?)
}

async fn write_archive(engine: &Engine, out: &Path) -> Result<(), AppError> {
    let archive = engine.transfer.export_zip(ExportScope::All).await?;
    tokio::fs::write(out, &archive).await?;
    info!(
        target = "threadline::pack",
        path = %out.display(),
        bytes = archive.len(),
        "Archive written"
    );
    Ok(())
}

async fn load_bundle(engine: &Engine, path: &Path) -> Result<(), AppError> {
    let bytes = tokio::fs::read(path).await?;
    let report = engine.transfer.import(&bytes).await?;

    info!(
        target = "threadline::import",
        path = %path.display(),
        imported = report.imported,
        failed = report.failed,
        "Bundle loaded"
    );
    for problem in &report.errors {
        warn!(target = "threadline::import", error = %problem, "Comment skipped");
    }
    Ok(())
}
