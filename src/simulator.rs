//! 메모리 링크 시뮬레이터
//!
//! 실제 라디오 없이 신뢰성 메커니즘을 검증하기 위한 링크 쌍. 각 끝점의 전송에
//! 장애 모델을 적용
//!
//! | 장애        | 설명                                          |
//! |-------------|-----------------------------------------------|
//! | 지정 유실   | n번째 전송 패킷을 확정적으로 버림             |
//! | 확률 유실   | `loss_rate` 확률로 버림                       |
//! | 중복        | `duplicate_rate` 확률로 두 번 전달            |
//! | 잡음        | `noise_rate` 확률로 임의 바이트 패킷을 먼저 전달|
//!
//! 잡음은 기본적으로 어떤 헤더와도 겹치지 않는 첫 바이트를 가짐. `header_noise`를
//! 켜면 첫 바이트가 태그 바이트나 숫자, 제어 토큰 첫 글자일 수 있음
//!
//! 난수는 시드 고정 `StdRng`를 사용하므로 같은 설정이면 같은 결과

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::debug;

use crate::link::{check_payload, Link};
use crate::{Error, Result, DEFAULT_MAX_PAYLOAD};

/// 헤더 첫 바이트 후보: 태그, 숫자, `READY_TO_SEND`/`ACK`/`END_` 첫 글자
const HEADER_LIKE: [u8; 10] = [0xA1, 0xA2, 0xA3, 0xA4, b'0', b'1', b'9', b'R', b'A', b'E'];

/// 장애 모델 설정
///
/// 확률은 모두 `[0.0, 1.0]`
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// 확정적으로 버릴 전송 순번 (0부터)
    pub drop_indices: HashSet<usize>,

    /// 패킷 유실 확률
    pub loss_rate: f64,

    /// 패킷 중복 확률
    pub duplicate_rate: f64,

    /// 잡음 패킷 삽입 확률
    pub noise_rate: f64,

    /// 헤더처럼 보이는 잡음 허용
    pub header_noise: bool,

    /// 난수 시드
    pub seed: u64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        // 장애 없음
        Self {
            drop_indices: HashSet::new(),
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            noise_rate: 0.0,
            header_noise: false,
            seed: 0x5346_5450,
        }
    }
}

impl FaultConfig {
    /// 장애 없는 링크
    pub fn lossless() -> Self {
        Self::default()
    }

    /// 지정한 전송 순번만 버림
    pub fn dropping<I: IntoIterator<Item = usize>>(indices: I) -> Self {
        Self {
            drop_indices: indices.into_iter().collect(),
            ..Self::default()
        }
    }

    /// 헤더처럼 보이는 잡음 삽입
    pub fn noisy(noise_rate: f64, seed: u64) -> Self {
        Self {
            noise_rate,
            header_noise: true,
            seed,
            ..Self::default()
        }
    }

    /// 확률 유실
    pub fn lossy(loss_rate: f64, seed: u64) -> Self {
        Self {
            loss_rate,
            seed,
            ..Self::default()
        }
    }
}

/// 시뮬레이션 링크의 한쪽 끝점
pub struct SimulatedLink {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
    faults: FaultConfig,
    rng: StdRng,
    max_payload: usize,

    /// 전송 시도 순번
    transmit_count: usize,

    /// 이 끝점이 전송한 모든 패킷 (버려진 것 포함)
    transmitted: Arc<Mutex<Vec<Bytes>>>,
}

impl SimulatedLink {
    /// 기본 패킷 크기로 연결된 링크 쌍 생성
    pub fn pair(a_faults: FaultConfig, b_faults: FaultConfig) -> (Self, Self) {
        Self::pair_with_payload(DEFAULT_MAX_PAYLOAD, a_faults, b_faults)
    }

    /// 연결된 링크 쌍 생성
    pub fn pair_with_payload(
        max_payload: usize,
        a_faults: FaultConfig,
        b_faults: FaultConfig,
    ) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();

        (
            Self::new(a_tx, a_rx, a_faults, max_payload),
            Self::new(b_tx, b_rx, b_faults, max_payload),
        )
    }

    fn new(
        tx: mpsc::UnboundedSender<Bytes>,
        rx: mpsc::UnboundedReceiver<Bytes>,
        faults: FaultConfig,
        max_payload: usize,
    ) -> Self {
        Self {
            tx,
            rx,
            rng: StdRng::seed_from_u64(faults.seed),
            faults,
            max_payload,
            transmit_count: 0,
            transmitted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 전송 기록 핸들
    ///
    /// 링크를 송수신기에 넘긴 뒤에도 전송 내역을 확인하기 위함
    pub fn tap(&self) -> Arc<Mutex<Vec<Bytes>>> {
        self.transmitted.clone()
    }

    /// 잡음 패킷
    ///
    /// `header_noise`가 꺼져 있으면 첫 바이트가 10진 숫자, 제어 토큰 첫 글자,
    /// 태그 바이트 어느 것과도 겹치지 않음
    fn noise(&mut self) -> Bytes {
        let len = self.rng.gen_range(1..=self.max_payload.min(32));
        let mut bytes = vec![0u8; len];
        self.rng.fill(&mut bytes[..]);
        bytes[0] = if !self.faults.header_noise {
            self.rng.gen_range(0x00..0x30)
        } else if self.rng.gen_bool(0.5) {
            HEADER_LIKE[self.rng.gen_range(0..HEADER_LIKE.len())]
        } else {
            self.rng.gen()
        };
        Bytes::from(bytes)
    }

    fn deliver(&self, packet: Bytes) -> Result<()> {
        self.tx.send(packet).map_err(|_| Error::ConnectionClosed)
    }
}

impl Link for SimulatedLink {
    fn max_payload(&self) -> usize {
        self.max_payload
    }

    async fn transmit(&mut self, payload: &[u8]) -> Result<()> {
        check_payload(payload, self.max_payload)?;

        let index = self.transmit_count;
        self.transmit_count += 1;

        let packet = Bytes::copy_from_slice(payload);
        self.transmitted.lock().push(packet.clone());

        if self.faults.drop_indices.contains(&index) {
            debug!("simulator: 전송 #{} 지정 유실", index);
            return Ok(());
        }
        if self.faults.loss_rate > 0.0 && self.rng.gen_bool(self.faults.loss_rate) {
            debug!("simulator: 전송 #{} 확률 유실", index);
            return Ok(());
        }
        if self.faults.noise_rate > 0.0 && self.rng.gen_bool(self.faults.noise_rate) {
            let noise = self.noise();
            self.deliver(noise)?;
        }

        self.deliver(packet.clone())?;

        if self.faults.duplicate_rate > 0.0 && self.rng.gen_bool(self.faults.duplicate_rate) {
            debug!("simulator: 전송 #{} 중복", index);
            self.deliver(packet)?;
        }

        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(packet)) => Ok(Some(packet)),
            Ok(None) => Err(Error::ConnectionClosed),
            Err(_) => Ok(None),
        }
    }
}
