//! SWFT 수신기
//!
//! Ready를 기다렸다가 종료 마커까지 받은 내용을 파일로 저장
//!
//! 사용법:
//!   cargo run --release --bin swft-receiver -- [OPTIONS] --output <PATH>
//!
//! 예시:
//!   cargo run --release --bin swft-receiver -- --bind 0.0.0.0:9001 --peer 127.0.0.1:9000 -o received.bin

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use swft::{Config, Receiver, UdpLink};

/// 수신기 설정
struct ReceiverArgs {
    bind_addr: SocketAddr,
    peer_addr: SocketAddr,
    output_path: PathBuf,
    config: Config,
}

impl Default for ReceiverArgs {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9001)),
            peer_addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
            output_path: PathBuf::from("received_data.txt"),
            config: Config::default(),
        }
    }
}

fn parse_args() -> ReceiverArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ReceiverArgs::default();

    if args.iter().any(|a| a == "--legacy") {
        parsed.config = Config::legacy();
    } else if args.iter().any(|a| a == "--long-range") {
        parsed.config = Config::long_range();
    } else if args.iter().any(|a| a == "--loopback") {
        parsed.config = Config::loopback();
    }

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    parsed.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--peer" | "-p" => {
                if i + 1 < args.len() {
                    parsed.peer_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    parsed.output_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--max-payload" => {
                if i + 1 < args.len() {
                    parsed.config.max_payload = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--ready-timeout" => {
                if i + 1 < args.len() {
                    let secs: u64 = args[i + 1].parse().expect("유효한 숫자 필요");
                    parsed.config.ready_timeout_ms = secs * 1000;
                    i += 1;
                }
            }
            "--idle-timeout" => {
                if i + 1 < args.len() {
                    let secs: u64 = args[i + 1].parse().expect("유효한 숫자 필요");
                    parsed.config.idle_timeout_ms = secs * 1000;
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"SWFT Receiver - Stop-and-Wait File Transfer 수신기

사용법:
  cargo run --release --bin swft-receiver -- [OPTIONS]

옵션:
  -b, --bind <ADDR>         바인드 주소 (기본: 0.0.0.0:9001)
  -p, --peer <ADDR>         송신기 주소 (기본: 127.0.0.1:9000)
  -o, --output <PATH>       저장 경로 (기본: received_data.txt)
  --max-payload <BYTES>     최대 패킷 크기 (기본: 248)
  --ready-timeout <SECS>    READY 대기 한도, 0이면 무제한 (기본: 0)
  --idle-timeout <SECS>     세션 중 무응답 한도, 0이면 무제한 (기본: 0)
  --legacy                  기존 ASCII 포맷
  --long-range              장거리/고손실 링크 프리셋
  --loopback                로컬 테스트 프리셋 (짧은 타임아웃)
  -h, --help                이 도움말 출력

환경 변수:
  RUST_LOG                  로그 필터 (기본: info)

종료 코드:
  0 성공, 4 무결성 불일치, 5 타임아웃, 130 중단, 1 기타
"#
                );
                std::process::exit(0);
            }
            "--legacy" | "--long-range" | "--loopback" => {}
            other => {
                eprintln!("알 수 없는 옵션: {} (--help 참고)", other);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args();

    info!("SWFT Receiver starting...");
    info!("Bind address: {}", args.bind_addr);
    info!("Output: {}", args.output_path.display());

    let link = UdpLink::connect(args.bind_addr, args.peer_addr)
        .await?
        .with_max_payload(args.config.max_payload);

    let mut receiver = Receiver::new(link, args.config)?;

    let abort = receiver.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("중단 요청");
            abort.abort();
        }
    });

    match receiver.receive_to_file(&args.output_path).await {
        Ok(_) => Ok(()),
        Err(e) => {
            error!("수신 실패: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}
