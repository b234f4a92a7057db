//! # SWFT (Stop-and-Wait File Transfer)
//!
//! 저대역폭 반이중 패킷 라디오 링크 위의 신뢰성 있는 순서 보장 파일 전송 프로토콜
//!
//! ## 핵심 특징
//! - **핸드쉐이크**: 수신측이 듣고 있는지 확인한 뒤에만 데이터 전송
//! - **Stop-and-Wait**: 한 번에 하나의 단위만 전송, ACK 후 다음 단위
//! - **명시적 재시도 정책**: 최대 시도 횟수 + 백오프, 소진 시 타입 있는 에러
//! - **두 가지 와이어 포맷**: 기존 ASCII 토큰 포맷 / 태그 기반 포맷 (무결성 트레일러 포함)
//! - **협력적 취소**: 폴링 사이마다 abort 플래그 확인
//!
//! ```text
//!  Sender                                   Receiver
//!    │ ── Ready ───────────────────────────▶ │ await_ready
//!    │ ◀────────────────────────── Ack ──── │
//!    │ ── Data 0000 ───────────────────────▶ │ Reassembler
//!    │ ◀────────────────────────── Ack ──── │
//!    │            ...                        │
//!    │ ── End ─────────────────────────────▶ │ SessionClosed
//!    │ ◀────────────────────────── Ack ──── │
//! ```

pub mod abort;
pub mod chunk;
pub mod config;
pub mod delivery;
pub mod error;
pub mod handshake;
pub mod link;
pub mod message;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod stats;

pub use abort::AbortHandle;
pub use chunk::{Accepted, Chunk, Chunker, Reassembler, SequenceId};
pub use config::{Backoff, Config, RetryPolicy};
pub use delivery::DeliveryEngine;
pub use error::{Error, Result};
pub use handshake::Handshake;
pub use link::{Link, UdpLink};
pub use message::{AckKind, Announce, Packet, Trailer, WireFormat};
pub use receiver::{Receiver, ReceiverState};
pub use sender::Sender;
pub use simulator::{FaultConfig, SimulatedLink};
pub use stats::TransferStats;

/// 프로토콜 버전
pub const PROTOCOL_VERSION: u8 = 1;

/// 기본 최대 패킷 크기 (바이트, RFM9x 페이로드 한계)
pub const DEFAULT_MAX_PAYLOAD: usize = 248;

/// 데이터 패킷 헤더 폭 (바이트)
///
/// 두 와이어 포맷 모두 4바이트 (ASCII 10진 4자리 / 태그 1 + 시퀀스 3)
pub const HEADER_WIDTH: usize = 4;
