//! peerdrop 송신자 - 파일 공개 + 요청된 파일 스트리밍
//!
//! 사용법:
//!   cargo run --release --bin peerdrop-sender -- [OPTIONS]
//!
//! 예시:
//!   # 두 파일 공개
//!   cargo run --release --bin peerdrop-sender -- --file a.txt --file photo.png
//!
//!   # 느린 수신자용 작은 버퍼
//!   cargo run --release --bin peerdrop-sender -- -f big.iso --high-watermark 262144

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use peerdrop::{progress_channel, Config, FileHandle, FileSet, Sender, TcpChannel};

/// 송신자 실행 옵션
struct SenderOptions {
    bind_addr: SocketAddr,
    files: Vec<PathBuf>,
    config: Config,
}

impl Default for SenderOptions {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            files: Vec::new(),
            config: Config::new(),
        }
    }
}

const HELP: &str = r#"peerdrop sender - 파일 목록 공개 + 요청된 파일 전송

사용법:
  cargo run --release --bin peerdrop-sender -- [OPTIONS]

옵션:
  -b, --bind <ADDR>           바인드 주소 (기본: 0.0.0.0:9000)
  -f, --file <PATH>           공개할 파일 (여러 번 지정 가능)
  --chunk-size <SIZE>         청크 크기 바이트 (기본: 65536)
  --high-watermark <SIZE>     송신 버퍼 high watermark 바이트 (기본: 1048576)
  --low-spec                  저사양 기기용 설정
  -h, --help                  이 도움말 출력

로그 레벨은 RUST_LOG 환경 변수로 지정 (기본: info)
"#;

fn parse_args() -> Result<SenderOptions, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = SenderOptions::default();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--bind" | "-b", Some(v)) => {
                options.bind_addr = v.parse()?;
                i += 1;
            }
            ("--file" | "-f", Some(v)) => {
                options.files.push(PathBuf::from(v));
                i += 1;
            }
            ("--chunk-size", Some(v)) => {
                options.config.chunk_size = v.parse()?;
                i += 1;
            }
            ("--high-watermark", Some(v)) => {
                options.config.high_watermark = v.parse()?;
                i += 1;
            }
            ("--low-spec", _) => {
                let files = std::mem::take(&mut options.files);
                options.config = Config::low_spec();
                options.files = files;
            }
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

    info!("peerdrop sender starting...");
    info!("Chunk size: {} bytes", options.config.chunk_size);
    info!("High watermark: {} bytes", options.config.high_watermark);

    let files = FileSet::new();
    for path in &options.files {
        files.add(FileHandle::open(path)?)?;
    }
    if files.is_empty() {
        return Err("공개할 파일이 없음 (--file 필요)".into());
    }

    // 진행률 로그
    let (progress_tx, mut progress_rx) = progress_channel();
    tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            if progress.done {
                info!(peer = progress.peer, "{} 전송 완료", progress.name);
            } else {
                debug!(peer = progress.peer, "{}: {:.1}%", progress.name, progress.percent);
            }
        }
    });

    let sender = Arc::new(Sender::new(options.config.clone(), files).with_progress(progress_tx));
    let listener = TcpListener::bind(options.bind_addr).await?;
    info!("Listening on {}", options.bind_addr);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("accept 실패: {}", e);
                        continue;
                    }
                };

                match TcpChannel::from_stream(stream, &options.config) {
                    Ok((channel, events)) => {
                        info!("Receiver connected: {} (peer {})", addr, channel.remote_addr());
                        tokio::spawn(sender.clone().serve_peer(channel, events));
                    }
                    Err(e) => warn!("채널 생성 실패 {}: {}", addr, e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down ({} peers connected)", sender.peer_ids().len());
                break;
            }
        }
    }

    info!("{}", sender.get_stats().summary());
    Ok(())
}
