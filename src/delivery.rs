//! 신뢰 전달 엔진 (송신측)
//!
//! Stop-and-Wait: 단위 하나를 보내고, 그 단위에 대한 ACK가 올 때까지 다음 단위를
//! 보내지 않음. ACK 타임아웃이면 같은 단위를 재전송
//!
//! # 계약
//! - 동시에 전송 중인 단위는 최대 하나
//! - 현재 단위를 확인하는 ACK만 진행시킴 (지난 단위의 중복 ACK는 무시)
//! - 해석 불가 응답과 ACK가 아닌 패킷은 버리고 남은 대기 시간 동안 계속 대기
//! - 새 단위의 첫 전송 전에 이미 도착해 있던 패킷은 모두 버림. ASCII ACK에는
//!   시퀀스가 없으므로 남아 있는 ACK는 지난 단위의 것으로 취급
//! - 재전송 횟수와 간격은 `RetryPolicy`로 제한, 소진 시 `Error::DeliveryFailed`

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::link::Link;
use crate::message::{AckKind, Packet, WireFormat};
use crate::stats::TransferStats;
use crate::{AbortHandle, Config, Error, Result};

/// ACK 대기 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckWait {
    Acked,
    TimedOut,
}

/// 신뢰 전달 엔진
pub struct DeliveryEngine<'a, L> {
    link: &'a mut L,
    config: &'a Config,
    abort: &'a AbortHandle,
}

impl<'a, L: Link> DeliveryEngine<'a, L> {
    pub fn new(link: &'a mut L, config: &'a Config, abort: &'a AbortHandle) -> Self {
        Self {
            link,
            config,
            abort,
        }
    }

    /// 단위 하나를 상대에게 전달
    ///
    /// 확인 ACK를 받으면 `unit_interval_ms`만큼 쉬고 반환
    pub async fn deliver(&mut self, packet: &Packet, stats: &mut TransferStats) -> Result<()> {
        let bytes = self.config.wire_format.encode(packet)?;
        let expected = packet.ack_kind();
        let policy = self.config.delivery_retry;

        self.drain_queued(stats).await?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.abort.check()?;

            self.link.transmit(&bytes).await?;
            stats.units_sent += 1;
            if attempt > 1 {
                stats.retransmissions += 1;
            }
            debug!("Sending {} (시도 {})", packet.describe(), attempt);

            match self.await_ack(&expected, stats).await? {
                AckWait::Acked => {
                    stats.acks_received += 1;
                    debug!("Acknowledged {}", packet.describe());
                    break;
                }
                AckWait::TimedOut => {
                    warn!("{} ACK 타임아웃 (시도 {})", packet.describe(), attempt);
                }
            }

            if !policy.allows(attempt + 1) {
                return Err(Error::DeliveryFailed {
                    unit: packet.describe(),
                    attempts: attempt,
                });
            }

            let delay = policy.backoff.delay(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        if self.config.unit_interval_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.unit_interval_ms)).await;
        }

        Ok(())
    }

    /// 링크에 쌓여 있는 패킷을 기다리지 않고 모두 버림
    async fn drain_queued(&mut self, stats: &mut TransferStats) -> Result<()> {
        let format = self.config.wire_format;

        while let Some(bytes) = self.link.receive(Duration::ZERO).await? {
            match format.decode(&bytes) {
                Ok(Packet::Ack(kind)) => {
                    stats.stale_acks += 1;
                    debug!("대기열의 지난 ACK 버림: {:?}", kind);
                }
                Ok(other) => debug!("대기열의 패킷 버림: {}", other.describe()),
                Err(e) => {
                    stats.malformed_packets += 1;
                    debug!("대기열의 해석 불가 패킷 버림: {}", e);
                }
            }
        }

        Ok(())
    }

    /// `ack_timeout` 동안 `expected`를 확인하는 ACK 대기
    async fn await_ack(&mut self, expected: &AckKind, stats: &mut TransferStats) -> Result<AckWait> {
        let deadline = Instant::now() + self.config.ack_timeout();
        let format = self.config.wire_format;

        loop {
            let now = Instant::now();
            if now >= deadline {
                stats.timeouts += 1;
                return Ok(AckWait::TimedOut);
            }

            let Some(bytes) = self.link.receive(deadline - now).await? else {
                continue;
            };

            match format.decode(&bytes) {
                Ok(Packet::Ack(kind)) if kind.acknowledges(expected) => return Ok(AckWait::Acked),
                Ok(Packet::Ack(kind)) => {
                    stats.stale_acks += 1;
                    debug!("지난 단위 ACK 무시: {:?} (대기 중 {:?})", kind, expected);
                }
                Ok(other) => {
                    debug!("ACK 대기 중 예상 밖 패킷 무시: {}", other.describe());
                }
                Err(e) => {
                    stats.malformed_packets += 1;
                    warn!("Received malformed packet. Ignoring: {}", e);
                }
            }
        }
    }
}

/// ACK 한 개 전송
pub(crate) async fn send_ack<L: Link>(
    link: &mut L,
    format: WireFormat,
    kind: AckKind,
    stats: &mut TransferStats,
) -> Result<()> {
    let bytes = format.encode(&Packet::Ack(kind))?;
    link.transmit(&bytes).await?;
    stats.acks_sent += 1;
    Ok(())
}
