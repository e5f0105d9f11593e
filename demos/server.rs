//! A standalone WebDAV server binary: serves a local directory (or an
//! ephemeral in-memory filesystem) over plain HTTP via axum, using
//! `DavHandler` as the single `any()` route handler. Mirrors the shape of
//! the crate's own axum/hyper wiring examples, with a `clap` CLI layered on
//! top for the options a litmus run or manual testing session needs.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Extension, Request};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use clap::Parser;
use dav_engine::auth::BasicAuthenticator;
use dav_engine::{DavHandler, ThrottleConfig};
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "dav-server-demo", version, about = "Serve a directory over WebDAV")]
struct Args {
    /// Local directory to serve. Omit to serve an ephemeral in-memory filesystem.
    #[arg(short, long)]
    dir: Option<String>,

    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:4918")]
    addr: String,

    /// URL path prefix the engine is mounted under.
    #[arg(long, default_value = "/dav")]
    prefix: String,

    /// Reject all writes (PUT/DELETE/MKCOL/COPY/MOVE/PROPPATCH/LOCK).
    #[arg(long)]
    read_only: bool,

    /// Require HTTP Basic auth; format is user:password, repeatable.
    #[arg(long = "user", value_name = "USER:PASS")]
    users: Vec<String>,

    /// Cap concurrent in-flight requests and per-client requests/second.
    #[arg(long)]
    throttle: bool,
}

#[tokio::main]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "debug");
        }
    }
    env_logger::init();

    let args = Args::parse();

    let mut builder = DavHandler::builder().url_prefix(args.prefix.clone()).read_only(args.read_only);

    builder = match &args.dir {
        Some(dir) => {
            #[cfg(feature = "localfs")]
            {
                builder.filesystem(Arc::new(dav_engine::localfs::LocalFs::new(dir)))
            }
            #[cfg(not(feature = "localfs"))]
            {
                let _ = dir;
                panic!("--dir requires the localfs feature");
            }
        },
        None => builder.filesystem(Arc::new(dav_engine::memfs::MemFs::new())),
    };

    if !args.users.is_empty() {
        let mut auth = BasicAuthenticator::new("dav");
        for entry in &args.users {
            let (user, pass) = entry.split_once(':').expect("--user expects USER:PASS");
            auth = auth.add_user(user, pass);
        }
        builder = builder.authenticator(Arc::new(auth)).allow_anonymous(false);
    }

    if args.throttle {
        builder = builder.throttle(ThrottleConfig::new(64, 50, 1));
    }

    let dav = builder.build_handler();

    let router = Router::new()
        .route(&args.prefix, any(handle_dav))
        .route(&format!("{}/", args.prefix), any(handle_dav))
        .route(&format!("{}/{{*path}}", args.prefix), any(handle_dav))
        .layer(Extension(dav));

    let addr: SocketAddr = args.addr.parse().expect("invalid --addr");
    let listener = TcpListener::bind(addr).await.expect("failed to bind");
    log::info!(
        "serving {} at http://{}{}",
        args.dir.as_deref().unwrap_or("(memory filesystem)"),
        addr,
        args.prefix
    );
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await.unwrap();
}

async fn handle_dav(
    Extension(dav): Extension<DavHandler>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    req: Request,
) -> impl IntoResponse {
    dav.handle(req, &remote.to_string()).await
}
