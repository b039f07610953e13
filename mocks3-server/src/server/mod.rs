use std::{path::Path, sync::Arc};

use rama::{
    Layer,
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    http::{
        HeaderValue,
        layer::{required_header::AddRequiredResponseHeadersLayer, trace::TraceLayer},
        server::HttpServer,
    },
    layer::TimeoutLayer,
    net::address::SocketAddress,
    rt::Executor,
    tcp::server::TcpListener,
    telemetry::tracing,
};

use mocks3_lib::{service::TransferService, utils::env::server_identifier};

use crate::Args;

pub async fn run_transfer_server(args: Args, guard: ShutdownGuard) -> Result<(), BoxError> {
    let model = args
        .model
        .try_to_model()
        .context("create latency model from cli arguments")?;
    let cfg = args.emulation_config();
    tracing::info!(?model, ?cfg, "latency model ready");

    let http_svc = (
        TraceLayer::new_for_http(),
        AddRequiredResponseHeadersLayer::new()
            .with_server_header_value(HeaderValue::from_static(server_identifier())),
    )
        .into_layer(TransferService::new(model, cfg));

    let exec = Executor::graceful(guard);
    let http_server = HttpServer::auto(exec.clone()).service(Arc::new(http_svc));

    let tcp_svc = TimeoutLayer::new(args.timeout).into_layer(http_server);

    let tcp_listener = TcpListener::bind(args.bind, exec)
        .await
        .context("bind transfer server")?;

    let addr = tcp_listener
        .local_addr()
        .context("get bound address for transfer server")?;

    tracing::info!("transfer server bound to: {addr}");
    write_server_socket_address_as_file(&args.data, "mocks3", addr.into()).await?;

    tcp_listener.serve(tcp_svc).await;

    Ok(())
}

async fn write_server_socket_address_as_file(
    dir: &Path,
    name: &str,
    addr: SocketAddress,
) -> Result<(), BoxError> {
    let path = dir.join(format!("{name}.addr.txt"));
    tokio::fs::write(&path, addr.to_string())
        .await
        .context("write server's socket address to file")
        .context_field("address", addr)
        .with_context_debug_field("path", || path.to_owned())
}
