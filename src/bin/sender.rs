//! SWFT 송신기
//!
//! 파일 하나를 Stop-and-Wait로 수신기에 전송. UDP 링크를 라디오 대용으로 사용
//!
//! 사용법:
//!   cargo run --release --bin swft-sender -- [OPTIONS] --file <PATH>
//!
//! 예시:
//!   # 기본 전송
//!   cargo run --release --bin swft-sender -- --peer 127.0.0.1:9001 --file data.bin
//!
//!   # 기존 ASCII 라디오 스크립트와 통신
//!   cargo run --release --bin swft-sender -- -f data.bin --legacy

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use swft::config::RetryPolicy;
use swft::{Config, Sender, UdpLink};

/// 송신기 설정
struct SenderArgs {
    bind_addr: SocketAddr,
    peer_addr: SocketAddr,
    file_path: Option<PathBuf>,
    config: Config,
}

impl Default for SenderArgs {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            peer_addr: SocketAddr::from(([127, 0, 0, 1], 9001)),
            file_path: None,
            config: Config::default(),
        }
    }
}

fn parse_args() -> SenderArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = SenderArgs::default();

    // 프리셋 먼저 적용해야 개별 옵션이 덮어쓸 수 있음
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
            "--file" | "-f" => {
                if i + 1 < args.len() {
                    parsed.file_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--max-payload" => {
                if i + 1 < args.len() {
                    parsed.config.max_payload = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--attempts" => {
                if i + 1 < args.len() {
                    let attempts = args[i + 1].parse().expect("유효한 숫자 필요");
                    parsed.config.handshake_retry.max_attempts = attempts;
                    parsed.config.delivery_retry.max_attempts = attempts;
                    i += 1;
                }
            }
            "--unbounded" => {
                parsed.config.handshake_retry = RetryPolicy::unbounded();
                parsed.config.delivery_retry = RetryPolicy::unbounded();
            }
            "--help" | "-h" => {
                println!(
                    r#"SWFT Sender - Stop-and-Wait File Transfer 송신기

반이중 패킷 라디오 링크용 신뢰 전송 (UDP로 라디오 대용)

사용법:
  cargo run --release --bin swft-sender -- [OPTIONS] --file <PATH>

옵션:
  -b, --bind <ADDR>       바인드 주소 (기본: 0.0.0.0:9000)
  -p, --peer <ADDR>       수신기 주소 (기본: 127.0.0.1:9001)
  -f, --file <PATH>       전송할 파일 경로
  --max-payload <BYTES>   최대 패킷 크기 (기본: 248)
  --attempts <N>          단위당 최대 시도 횟수, 0이면 무제한
  --unbounded             무제한 재시도
  --legacy                기존 ASCII 포맷 + 무제한 재시도
  --long-range            장거리/고손실 링크 프리셋
  --loopback              로컬 테스트 프리셋 (짧은 타임아웃)
  -h, --help              이 도움말 출력

환경 변수:
  RUST_LOG                로그 필터 (기본: info)

종료 코드:
  0 성공, 2 핸드쉐이크 실패, 3 전달 실패, 5 타임아웃, 130 중단, 1 기타
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
    let Some(file_path) = args.file_path else {
        eprintln!("--file 필요 (--help 참고)");
        std::process::exit(1);
    };

    info!("SWFT Sender starting...");
    info!("Peer address: {}", args.peer_addr);
    info!("Wire format: {:?}", args.config.wire_format);

    let link = UdpLink::connect(args.bind_addr, args.peer_addr)
        .await?
        .with_max_payload(args.config.max_payload);

    let mut sender = Sender::new(link, args.config)?;

    let abort = sender.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("중단 요청");
            abort.abort();
        }
    });

    match sender.send_file(&file_path).await {
        Ok(stats) => {
            info!("{}", stats.summary());
            Ok(())
        }
        Err(e) => {
            error!("전송 실패: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}
