//! 에러 타입 정의

use thiserror::Error;

/// SWFT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("유효하지 않은 패킷: {0}")]
    MalformedPacket(String),

    #[error("패킷 크기 초과: {size} bytes (최대 {max} bytes)")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("시퀀스 번호 오버플로우: 최대 {max}")]
    SequenceOverflow { max: u32 },

    #[error("유효하지 않은 프로토콜 버전: expected {expected}, got {got}")]
    InvalidVersion { expected: u8, got: u8 },

    #[error("핸드쉐이크 실패: {attempts}회 시도 후 응답 없음")]
    HandshakeFailed { attempts: u32 },

    #[error("전송 실패: {unit}, {attempts}회 시도 후 ACK 없음")]
    DeliveryFailed { unit: String, attempts: u32 },

    #[error("타임아웃: {phase}")]
    Timeout { phase: &'static str },

    #[error(
        "무결성 불일치: expected {expected_chunks} chunks/{expected_bytes} bytes/{expected_crc:08X}, \
         got {got_chunks} chunks/{got_bytes} bytes/{got_crc:08X}"
    )]
    IntegrityMismatch {
        expected_chunks: u32,
        got_chunks: u32,
        expected_bytes: u64,
        got_bytes: u64,
        expected_crc: u32,
        got_crc: u32,
    },

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("전송 중단됨")]
    Aborted,

    #[error("연결 종료")]
    ConnectionClosed,
}

impl Error {
    /// 바이너리용 종료 코드
    ///
    /// 0은 성공이므로 사용하지 않음
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::HandshakeFailed { .. } => 2,
            Error::DeliveryFailed { .. } => 3,
            Error::IntegrityMismatch { .. } => 4,
            Error::Timeout { .. } => 5,
            Error::Aborted => 130,
            _ => 1,
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
