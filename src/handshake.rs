//! 핸드쉐이크
//!
//! 송신측은 Ready를 보내고 ACK를 기다리며, 수신측은 Ready가 올 때까지 다른 패킷을
//! 모두 버림. 해석 불가 패킷은 로그만 남기고 무시

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::delivery::send_ack;
use crate::link::Link;
use crate::message::{AckKind, Announce, Packet, WireFormat};
use crate::stats::TransferStats;
use crate::{AbortHandle, Config, Error, Result, PROTOCOL_VERSION};

/// 핸드쉐이크 조정자
pub struct Handshake<'a, L> {
    link: &'a mut L,
    config: &'a Config,
    abort: &'a AbortHandle,
}

impl<'a, L: Link> Handshake<'a, L> {
    pub fn new(link: &'a mut L, config: &'a Config, abort: &'a AbortHandle) -> Self {
        Self {
            link,
            config,
            abort,
        }
    }

    /// 송신측: Ready 전송 후 ACK 대기
    ///
    /// `handshake_window` 안에 ACK가 없으면 `handshake_retry`에 따라 Ready를 다시 보냄.
    /// 소진 시 `Error::HandshakeFailed`
    pub async fn announce_ready(&mut self, stats: &mut TransferStats) -> Result<()> {
        let ready = match self.config.wire_format {
            WireFormat::Tagged => Packet::Ready(Some(Announce {
                version: PROTOCOL_VERSION,
                max_payload: self.config.max_payload as u16,
            })),
            WireFormat::Ascii => Packet::Ready(None),
        };
        let bytes = self.config.wire_format.encode(&ready)?;
        let policy = self.config.handshake_retry;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.abort.check()?;

            self.link.transmit(&bytes).await?;
            stats.handshake_attempts += 1;
            info!("Sending READY (시도 {})", attempt);

            if self.wait_for_ready_ack(stats).await? {
                stats.acks_received += 1;
                info!("Receiver ready");
                return Ok(());
            }

            if !policy.allows(attempt + 1) {
                return Err(Error::HandshakeFailed { attempts: attempt });
            }

            warn!("READY ACK 없음, 재시도");
            let delay = policy.backoff.delay(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// `handshake_window` 동안 `handshake_poll` 간격으로 Ready ACK 확인
    async fn wait_for_ready_ack(&mut self, stats: &mut TransferStats) -> Result<bool> {
        let deadline = Instant::now() + self.config.handshake_window();
        let format = self.config.wire_format;

        loop {
            self.abort.check()?;

            let now = Instant::now();
            if now >= deadline {
                stats.timeouts += 1;
                return Ok(false);
            }
            let wait = self.config.handshake_poll().min(deadline - now);

            let Some(bytes) = self.link.receive(wait).await? else {
                continue;
            };

            match format.decode(&bytes) {
                Ok(Packet::Ack(kind)) if kind.acknowledges(&AckKind::Ready) => return Ok(true),
                Ok(Packet::Ack(kind)) => {
                    stats.stale_acks += 1;
                    debug!("Ready가 아닌 ACK 무시: {:?}", kind);
                }
                Ok(other) => debug!("핸드쉐이크 중 패킷 무시: {}", other.describe()),
                Err(e) => {
                    stats.malformed_packets += 1;
                    warn!("Received malformed packet. Ignoring: {}", e);
                }
            }
        }
    }

    /// 수신측: Ready 대기 후 ACK 전송
    ///
    /// Ready가 아닌 패킷과 버전이 다른 Ready는 모두 버림. `ready_timeout_ms`가 0이 아니면 그 시간 안에
    /// Ready가 없을 때 `Error::Timeout`
    pub async fn await_ready(&mut self, stats: &mut TransferStats) -> Result<()> {
        let deadline = match self.config.ready_timeout_ms {
            0 => None,
            ms => Some(Instant::now() + Duration::from_millis(ms)),
        };
        let format = self.config.wire_format;

        info!("Waiting for READY");
        loop {
            self.abort.check()?;

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout { phase: "READY 대기" });
                    }
                    self.config.handshake_poll().min(deadline - now)
                }
                None => self.config.handshake_poll(),
            };

            let Some(bytes) = self.link.receive(wait).await? else {
                stats.timeouts += 1;
                continue;
            };

            match format.decode(&bytes) {
                Ok(Packet::Ready(announce)) => {
                    if let Some(announce) = announce {
                        if !self.check_announce(&announce) {
                            stats.malformed_packets += 1;
                            continue;
                        }
                    }
                    send_ack(&mut *self.link, format, AckKind::Ready, stats).await?;
                    info!("READY received, ACK sent");
                    return Ok(());
                }
                Ok(other) => debug!("Ready 대기 중 패킷 무시: {}", other.describe()),
                Err(e) => {
                    stats.malformed_packets += 1;
                    warn!("Received malformed packet. Ignoring: {}", e);
                }
            }
        }
    }

    /// 받아들일 Ready인지 확인
    ///
    /// 버전이 다르면 잡음이나 다른 프로토콜로 보고 ACK 없이 버림
    fn check_announce(&self, announce: &Announce) -> bool {
        if announce.version != PROTOCOL_VERSION {
            warn!(
                "{}",
                Error::InvalidVersion {
                    expected: PROTOCOL_VERSION,
                    got: announce.version,
                }
            );
            return false;
        }
        if announce.max_payload as usize > self.link.max_payload() {
            warn!(
                "송신측 패킷 크기 {}가 링크 한도 {}보다 큼",
                announce.max_payload,
                self.link.max_payload()
            );
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::simulator::{FaultConfig, SimulatedLink};

    fn test_config(format: WireFormat) -> Config {
        Config {
            wire_format: format,
            handshake_poll_ms: 10,
            handshake_window_ms: 30,
            handshake_retry: RetryPolicy::bounded(3),
            ..Config::loopback()
        }
    }

    #[tokio::test]
    async fn test_handshake_completes_in_both_formats() {
        for format in [WireFormat::Ascii, WireFormat::Tagged] {
            let (mut tx_link, mut rx_link) =
                SimulatedLink::pair(FaultConfig::lossless(), FaultConfig::lossless());
            let config = test_config(format);
            let abort = AbortHandle::new();

            let receiver = {
                let config = config.clone();
                let abort = abort.clone();
                tokio::spawn(async move {
                    let mut stats = TransferStats::new();
                    let result = Handshake::new(&mut rx_link, &config, &abort)
                        .await_ready(&mut stats)
                        .await;
                    result.map(|_| stats)
                })
            };

            let mut stats = TransferStats::new();
            Handshake::new(&mut tx_link, &config, &abort)
                .announce_ready(&mut stats)
                .await
                .unwrap();
            assert_eq!(stats.handshake_attempts, 1);

            let rx_stats = receiver.await.unwrap().unwrap();
            assert_eq!(rx_stats.acks_sent, 1);
        }
    }

    #[tokio::test]
    async fn test_lost_ready_is_retried() {
        let (mut tx_link, mut rx_link) =
            SimulatedLink::pair(FaultConfig::dropping([0]), FaultConfig::lossless());
        let config = test_config(WireFormat::Tagged);
        let abort = AbortHandle::new();

        let receiver = {
            let config = config.clone();
            let abort = abort.clone();
            tokio::spawn(async move {
                let mut stats = TransferStats::new();
                Handshake::new(&mut rx_link, &config, &abort)
                    .await_ready(&mut stats)
                    .await
            })
        };

        let mut stats = TransferStats::new();
        Handshake::new(&mut tx_link, &config, &abort)
            .announce_ready(&mut stats)
            .await
            .unwrap();
        assert_eq!(stats.handshake_attempts, 2);
        receiver.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_silent_receiver_fails_handshake() {
        let (mut tx_link, _rx_link) =
            SimulatedLink::pair(FaultConfig::lossless(), FaultConfig::lossless());
        let config = test_config(WireFormat::Tagged);
        let abort = AbortHandle::new();
        let mut stats = TransferStats::new();

        let result = Handshake::new(&mut tx_link, &config, &abort)
            .announce_ready(&mut stats)
            .await;
        assert!(matches!(result, Err(Error::HandshakeFailed { attempts: 3 })));
        assert_eq!(stats.handshake_attempts, 3);
    }

    #[tokio::test]
    async fn test_receiver_ignores_noise_before_ready() {
        let (mut tx_link, mut rx_link) =
            SimulatedLink::pair(FaultConfig::lossless(), FaultConfig::lossless());
        let config = test_config(WireFormat::Ascii);
        let abort = AbortHandle::new();

        tx_link.transmit(b"\x01\x02garbage").await.unwrap();
        tx_link.transmit(b"0003stale data").await.unwrap();
        tx_link.transmit(b"READY_TO_SEND").await.unwrap();

        let mut stats = TransferStats::new();
        Handshake::new(&mut rx_link, &config, &abort)
            .await_ready(&mut stats)
            .await
            .unwrap();
        assert_eq!(stats.malformed_packets, 1);

        let ack = tx_link.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(&ack[..], b"ACK");
    }

    #[tokio::test]
    async fn test_ready_timeout() {
        let (_tx_link, mut rx_link) =
            SimulatedLink::pair(FaultConfig::lossless(), FaultConfig::lossless());
        let config = Config {
            ready_timeout_ms: 40,
            ..test_config(WireFormat::Tagged)
        };
        let abort = AbortHandle::new();
        let mut stats = TransferStats::new();

        let result = Handshake::new(&mut rx_link, &config, &abort)
            .await_ready(&mut stats)
            .await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_foreign_version_ready_is_discarded() {
        let (mut tx_link, mut rx_link) =
            SimulatedLink::pair(FaultConfig::lossless(), FaultConfig::lossless());
        let config = test_config(WireFormat::Tagged);
        let abort = AbortHandle::new();

        // Ready 태그로 시작하는 잡음 (version 7)
        tx_link.transmit(&[0xA1, 0x07, 0x00, 0x00]).await.unwrap();

        let foreign = Packet::Ready(Some(Announce {
            version: PROTOCOL_VERSION + 1,
            max_payload: 248,
        }));
        tx_link
            .transmit(&WireFormat::Tagged.encode(&foreign).unwrap())
            .await
            .unwrap();

        let ready = Packet::Ready(Some(Announce {
            version: PROTOCOL_VERSION,
            max_payload: 248,
        }));
        tx_link
            .transmit(&WireFormat::Tagged.encode(&ready).unwrap())
            .await
            .unwrap();

        let mut stats = TransferStats::new();
        Handshake::new(&mut rx_link, &config, &abort)
            .await_ready(&mut stats)
            .await
            .unwrap();
        assert_eq!(stats.malformed_packets, 2);
        assert_eq!(stats.acks_sent, 1);

        let ack = tx_link.receive(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(
            WireFormat::Tagged.decode(&ack).unwrap(),
            Packet::Ack(AckKind::Ready)
        );
        assert!(tx_link.receive(Duration::from_millis(20)).await.unwrap().is_none());
    }
}
