use std::{
    io::ErrorKind,
    path::PathBuf,
    sync::{Arc, LazyLock, OnceLock},
    time::Duration,
};

use clap::Parser;
use rama::net::address::SocketAddress;

use mocks3_lib::{
    client::{ClientConfig, TransferClient, WebClient, new_web_client},
    latency::LatencyModel,
    utils::test::unique_empty_temp_dir,
};

use crate::Args;

#[derive(Clone)]
pub(super) struct Runtime {
    _app: App,

    addr: SocketAddress,
}

impl Runtime {
    #[inline(always)]
    pub fn socket_addr(&self) -> SocketAddress {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn web_client(&self) -> WebClient {
        new_web_client().unwrap()
    }

    pub fn transfer_client(&self, cfg: ClientConfig) -> TransferClient {
        TransferClient::try_new(Some(&self.addr.to_string()), LatencyModel::default(), cfg)
            .unwrap()
    }
}

#[derive(Clone)]
struct App {
    data_dir: PathBuf,
}

pub(super) async fn get() -> Runtime {
    static APP: LazyLock<App> = LazyLock::new(App::new);

    let app = APP.clone();
    new_runtime(app).await
}

pub(super) async fn spawn_with_args(extra_args: &[&str]) -> Runtime {
    let data_dir = spawn_mocks3_server_app_with_args(extra_args);
    new_runtime(App { data_dir }).await
}

async fn new_runtime(app: App) -> Runtime {
    let addr = tokio::time::timeout(
        Duration::from_secs(30),
        read_file_or_wait(app.data_dir.join("mocks3.addr.txt")),
    )
    .await
    .unwrap();

    let runtime = Runtime { _app: app, addr };
    assert!(runtime.socket_addr().ip_addr.is_loopback());
    runtime
}

async fn read_file_or_wait(path: PathBuf) -> SocketAddress {
    loop {
        match tokio::fs::read_to_string(&path).await {
            Ok(s) => {
                let s = s.trim();
                if s.is_empty() {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    continue;
                }
                match s.parse() {
                    Ok(addr) => return addr,
                    Err(err) => {
                        eprintln!("unexpected error parsing socket addr (content={s:?}): {err}");
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        continue;
                    }
                }
            }
            Err(err) => {
                if err.kind() == ErrorKind::NotFound {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    continue;
                } else {
                    panic!("unexpected error: {err}");
                }
            }
        }
    }
}

impl App {
    fn new() -> Self {
        let data_dir = spawn_mocks3_server_app_with_args(&[]);
        Self { data_dir }
    }
}

fn spawn_mocks3_server_app_with_args(extra_args: &[&str]) -> PathBuf {
    let data_dir = unique_empty_temp_dir("mocks3_server_e2e").unwrap();
    eprintln!("mocks3_server_e2e all data stored under: {data_dir:?}");

    let data_dir_str = data_dir.display().to_string().leak();

    let mut argv: Vec<&str> = vec![
        "mocks3-server",
        "--bind",
        "127.0.0.1:0",
        "--data",
        data_dir_str,
        "--graceful",
        "0.42",
    ];
    argv.extend(extra_args);

    let args = Args::try_parse_from(argv).unwrap();

    let wait_server_ready = Arc::new(OnceLock::new());
    let notify_server_ready = wait_server_ready.clone();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();

        let server_future = crate::run_with_args(std::future::pending::<()>(), args);

        notify_server_ready.set(()).expect("waiter to be nofified");

        rt.block_on(server_future).expect("serve without errors");
    });

    wait_server_ready.wait();

    data_dir
}
