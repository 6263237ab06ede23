//! Wires an editor window to an embedding window over an in-memory pair and
//! drives a few invocations through it.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use serde_json::json;
use tracing::info;
use tracing_subscriber::prelude::*;

use officerpc::ClientHost;
use officerpc::ClientOptions;
use officerpc::MemoryWindow;
use officerpc::Methods;
use officerpc::ProxyContext;
use officerpc::Server;
use officerpc::ServerOptions;
use officeweb::UrlOptions;

#[derive(Parser)]
#[command(name = "loopback")]
#[command(about = "Editor and embedding window talking over an in-memory channel")]
struct Args {
    /// Origin of the editor window
    #[arg(long, default_value = "https://office.example")]
    editor_origin: String,

    /// Origin of the embedding window
    #[arg(long, default_value = "http://localhost:3000")]
    host_origin: String,

    /// Clients the embedding window knows before the editor is up
    #[arg(short, long, default_value = "2")]
    clients: usize,

    /// File the editor pretends to have open
    #[arg(long, default_value = "demo-file")]
    file_id: String,

    /// Log filter, overrides RUST_LOG
    #[arg(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = match &args.log {
        Some(directive) => tracing_subscriber::EnvFilter::new(directive),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let url = officeweb::generate_url(
        &UrlOptions::new(&args.editor_origin, "loopback-token", &args.file_id).lang("en-US"),
    )
    .context("building the editor url")?;
    info!(%url, "editor page");

    let (editor_window, host_window) = MemoryWindow::pair(&args.editor_origin, &args.host_origin);

    let title = args.file_id.clone();
    let proxy = move |ctx: ProxyContext| editor(ctx, title.clone());
    let mut server = Server::new(
        ServerOptions::new(proxy)
            .remote_window(Arc::new(editor_window))
            .allowed_origins([args.host_origin.as_str()])
            .local_origin(&args.editor_origin),
    )?;

    let mut host_options = ClientOptions::new()
        .remote_window(Arc::new(host_window))
        .allowed_origins([args.editor_origin.as_str()])
        .local_origin(&args.host_origin)
        .callbacks(Methods::new().method("progress", |args: Vec<Value>| async move {
            info!(?args, "progress callback");
            Ok(Value::Null)
        }));
    for n in 0..args.clients {
        host_options = host_options.client(format!("client-{n}"));
    }

    let host = ClientHost::connect(host_options).await?;
    let known = server.ready().await?;
    info!(clients = known.len(), state = %server.state(), "editor ready");

    let late = host.attach().await?;

    for id in host.clients() {
        let Some(client) = host.client(&id) else {
            continue;
        };
        let title = client.invoke("getTitle", vec![]).await?;
        println!("{id}: getTitle -> {title}");
    }

    let saved = late.invoke("save", vec![json!({ "force": true })]).await?;
    println!("{}: save -> {saved}", late.id());

    late.detach().await?;
    println!("{} detached, editor now tracks {} clients", late.id(), server.clients().len());

    host.close().await;
    server.close().await;
    Ok(())
}

/// The editor's method table for one invocation.
fn editor(ctx: ProxyContext, title: String) -> Methods {
    let callback = ctx.callback;

    Methods::new()
        .method("getTitle", move |_| {
            let title = title.clone();
            async move { Ok(json!(title)) }
        })
        .method("save", move |_| {
            let callback = callback.clone();
            async move { callback.call("progress", vec![json!(100)]).await.map(|_| json!("saved")) }
        })
}
