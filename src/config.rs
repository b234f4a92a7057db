//! 프로토콜 설정

use std::time::Duration;

use crate::message::WireFormat;
use crate::{Error, Result, DEFAULT_MAX_PAYLOAD, HEADER_WIDTH};

/// 재시도 사이 대기 시간 계산 방식
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// 대기 없이 즉시 재시도
    None,

    /// 고정 간격 (밀리초)
    Fixed { delay_ms: u64 },

    /// 지수 증가 (밀리초), `max_ms`에서 포화
    Exponential {
        initial_ms: u64,
        max_ms: u64,
        factor: f64,
    },
}

impl Backoff {
    /// `retry`번째 재시도 전 대기 시간 (1부터 시작)
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential {
                initial_ms,
                max_ms,
                factor,
            } => {
                let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
                let delay_ms = (initial_ms as f64 * factor.max(1.0).powi(exponent)).min(max_ms as f64);
                Duration::from_millis(delay_ms as u64)
            }
        }
    }
}

/// 재시도 정책
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// 최대 시도 횟수 (첫 전송 포함)
    /// 0이면 무제한
    pub max_attempts: u32,

    /// 재시도 간 대기
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// 최대 `max_attempts`회 시도, 대기 없음
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::None,
        }
    }

    /// 무제한 재시도 (기존 라디오 스크립트 동작)
    pub fn unbounded() -> Self {
        Self::bounded(0)
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// `attempt`번째 시도 (1부터 시작) 허용 여부
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt <= self.max_attempts
    }
}

/// SWFT 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 링크 최대 패킷 크기 (바이트)
    pub max_payload: usize,

    /// 와이어 포맷 (양쪽이 같아야 함)
    pub wire_format: WireFormat,

    /// 핸드쉐이크 폴링 간격 (밀리초)
    pub handshake_poll_ms: u64,

    /// Ready 한 번당 ACK 대기 시간 (밀리초)
    pub handshake_window_ms: u64,

    /// Ready 재전송 정책
    pub handshake_retry: RetryPolicy,

    /// 수신측 Ready 대기 한도 (밀리초)
    /// 0이면 무제한
    pub ready_timeout_ms: u64,

    /// 단위당 ACK 대기 시간 (밀리초)
    pub ack_timeout_ms: u64,

    /// 단위 재전송 정책
    pub delivery_retry: RetryPolicy,

    /// ACK 수신 후 다음 단위 전송까지 간격 (밀리초)
    /// 0이면 바로 전송
    pub unit_interval_ms: u64,

    /// 수신측 패킷 폴링 타임아웃 (밀리초)
    pub receive_timeout_ms: u64,

    /// 마지막 유효 단위 이후 세션 포기까지 시간 (밀리초)
    /// 0이면 무제한
    pub idle_timeout_ms: u64,

    /// 세션 종료 후 종료 마커 재전송에 ACK 해주는 시간 (밀리초)
    pub close_linger_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            wire_format: WireFormat::Tagged,
            handshake_poll_ms: 1000,          // 1초
            handshake_window_ms: 5000,        // 5초
            handshake_retry: RetryPolicy::bounded(12),
            ready_timeout_ms: 0,              // 무제한 대기
            ack_timeout_ms: 5000,             // 5초
            delivery_retry: RetryPolicy::bounded(20),
            unit_interval_ms: 100,            // 100ms
            receive_timeout_ms: 5000,         // 5초
            idle_timeout_ms: 0,               // 무제한
            close_linger_ms: 6000,            // ACK 타임아웃보다 길게
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 기존 라디오 스크립트와 동일한 동작 (ASCII 포맷, 무제한 재시도)
    pub fn legacy() -> Self {
        Self {
            wire_format: WireFormat::Ascii,
            handshake_retry: RetryPolicy::unbounded(),
            delivery_retry: RetryPolicy::unbounded(),
            close_linger_ms: 0,
            ..Self::default()
        }
    }

    /// 장거리/고손실 링크용 설정
    pub fn long_range() -> Self {
        Self {
            handshake_window_ms: 8000,
            handshake_retry: RetryPolicy::bounded(30).with_backoff(Backoff::Exponential {
                initial_ms: 500,
                max_ms: 30_000,
                factor: 2.0,
            }),
            ack_timeout_ms: 8000,
            delivery_retry: RetryPolicy::bounded(50).with_backoff(Backoff::Exponential {
                initial_ms: 250,
                max_ms: 10_000,
                factor: 1.5,
            }),
            unit_interval_ms: 250,
            receive_timeout_ms: 8000,
            idle_timeout_ms: 10 * 60 * 1000, // 10분
            close_linger_ms: 10_000,
            ..Self::default()
        }
    }

    /// 로컬 루프백/테스트용 설정 (짧은 타임아웃)
    pub fn loopback() -> Self {
        Self {
            handshake_poll_ms: 20,
            handshake_window_ms: 100,
            handshake_retry: RetryPolicy::bounded(50),
            ack_timeout_ms: 100,
            delivery_retry: RetryPolicy::bounded(50),
            unit_interval_ms: 0,
            receive_timeout_ms: 50,
            close_linger_ms: 300,
            ..Self::default()
        }
    }

    /// 데이터 청크 하나에 실을 수 있는 페이로드 크기
    pub fn chunk_capacity(&self) -> usize {
        self.max_payload.saturating_sub(HEADER_WIDTH)
    }

    pub fn handshake_poll(&self) -> Duration {
        Duration::from_millis(self.handshake_poll_ms)
    }

    pub fn handshake_window(&self) -> Duration {
        Duration::from_millis(self.handshake_window_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.max_payload <= HEADER_WIDTH {
            return Err(Error::InvalidConfig(format!(
                "max_payload {}는 헤더 {} bytes보다 커야 함",
                self.max_payload, HEADER_WIDTH
            )));
        }
        if self.max_payload > u16::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "max_payload {}는 {} 이하여야 함",
                self.max_payload,
                u16::MAX
            )));
        }
        if self.handshake_poll_ms == 0
            || self.handshake_window_ms == 0
            || self.ack_timeout_ms == 0
            || self.receive_timeout_ms == 0
        {
            return Err(Error::InvalidConfig("타임아웃은 0보다 커야 함".into()));
        }
        Ok(())
    }
}
