//! peerdrop 수신자 - 목록 조회 + 파일 요청 + 저장
//!
//! 사용법:
//!   cargo run --release --bin peerdrop-receiver -- [OPTIONS]
//!
//! 예시:
//!   # 목록만 출력
//!   cargo run --release --bin peerdrop-receiver -- --connect 127.0.0.1:9000 --list
//!
//!   # 두 파일 받아서 downloads/에 저장
//!   cargo run --release --bin peerdrop-receiver -- -c 127.0.0.1:9000 --files a.txt,photo.png -o downloads

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use peerdrop::{progress_channel, Config, DirectorySink, Receiver, TcpChannel};

/// 수신자 실행 옵션
struct ReceiverOptions {
    server_addr: SocketAddr,
    output_dir: PathBuf,
    /// None이면 전체
    files: Option<Vec<String>>,
    list_only: bool,
    config: Config,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
            output_dir: PathBuf::from("."),
            files: None,
            list_only: false,
            config: Config::new(),
        }
    }
}

const HELP: &str = r#"peerdrop receiver - 송신자의 파일 목록 조회 + 다운로드

사용법:
  cargo run --release --bin peerdrop-receiver -- [OPTIONS]

옵션:
  -c, --connect <ADDR>     송신자 주소 (기본: 127.0.0.1:9000)
  -o, --output <DIR>       저장 디렉터리 (기본: .)
  --files <A,B,...|all>    받을 파일 이름 (기본: all)
  --list                   목록만 출력하고 종료
  -h, --help               이 도움말 출력

로그 레벨은 RUST_LOG 환경 변수로 지정 (기본: info)
"#;

fn parse_args() -> Result<ReceiverOptions, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = ReceiverOptions::default();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--connect" | "-c", Some(v)) => {
                options.server_addr = v.parse()?;
                i += 1;
            }
            ("--output" | "-o", Some(v)) => {
                options.output_dir = PathBuf::from(v);
                i += 1;
            }
            ("--files", Some(v)) => {
                options.files = match v.as_str() {
                    "all" => None,
                    list => Some(
                        list.split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                            .collect(),
                    ),
                };
                i += 1;
            }
            ("--list", _) => options.list_only = true,
            ("--help" | "-h", _) => {
                println!("{HELP}");
                std::process::exit(0);
            }
            (other, _) => {
                warn!("알 수 없는 옵션 무시: {}", other);
            }
        }
        i += 1;
    }

    Ok(options)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = parse_args()?;
    options.config.validate()?;

    info!("peerdrop receiver connecting to {}", options.server_addr);
    let (channel, events) = TcpChannel::connect(options.server_addr, &options.config).await?;

    let (progress_tx, mut progress_rx) = progress_channel();
    tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            if progress.done {
                info!("{} 수신 완료", progress.name);
            } else {
                debug!("{}: {:.1}%", progress.name, progress.percent);
            }
        }
    });

    let (receiver, mut finished) =
        Receiver::start(options.config.clone(), channel, events, Some(progress_tx))?;

    let manifest = receiver.wait_for_list().await?;
    info!("Files offered: {}", manifest.len());
    for entry in &manifest {
        println!("  {:<40} {:>12} bytes  {}", entry.name, entry.size, entry.mime);
    }

    if options.list_only {
        receiver.stop().await;
        return Ok(());
    }

    // 목록에 없는 이름은 송신측이 건너뛰므로 미리 걸러냄
    let wanted: Vec<String> = match &options.files {
        None => manifest.iter().map(|e| e.name.clone()).collect(),
        Some(names) => {
            for name in names.iter().filter(|n| !manifest.iter().any(|e| &e.name == *n)) {
                warn!("목록에 없는 파일: {}", name);
            }
            manifest
                .iter()
                .filter(|e| names.contains(&e.name))
                .map(|e| e.name.clone())
                .collect()
        }
    };
    if wanted.is_empty() {
        warn!("받을 파일 없음");
        receiver.stop().await;
        return Ok(());
    }

    receiver.request_files(wanted.iter().cloned())?;

    let sink = DirectorySink::new(&options.output_dir);
    info!("Saving to {}", sink.root().display());
    let mut remaining = wanted.len();
    while remaining > 0 {
        match finished.recv().await {
            Some(file) => {
                let path = sink.save(&file).await?;
                info!("Saved {} ({} bytes)", path.display(), file.data.len());
                remaining -= 1;
            }
            None => {
                warn!("전송 중 연결 종료: {}개 미수신", remaining);
                break;
            }
        }
    }

    info!("{}", receiver.get_stats().summary());
    receiver.stop().await;
    Ok(())
}
