//! 수신자
//!
//! 상태 머신: `AwaitingReady → AwaitingPacket → SessionClosed`
//!
//! - 유효한 단위는 처리 전에 ACK
//! - 다음 청크는 버퍼에 추가, 재전송된 청크는 ACK만 다시 보냄
//! - 순서를 건너뛴 청크와 해석 불가 패킷은 ACK 없이 버림
//! - 트레일러의 청크 수/바이트 수가 조립 결과와 다른 종료 마커도 ACK 없이 버림
//! - 종료 마커 이후 `close_linger_ms` 동안 재전송된 종료 마커에 ACK

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::chunk::{Accepted, Reassembler};
use crate::delivery::send_ack;
use crate::handshake::Handshake;
use crate::link::Link;
use crate::message::{AckKind, Packet, Trailer};
use crate::stats::TransferStats;
use crate::{AbortHandle, Config, Error, Result};

/// 수신자 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Ready 대기
    AwaitingReady,

    /// 데이터/종료 마커 대기
    AwaitingPacket,

    /// 세션 종료
    SessionClosed,
}

/// 수신자
pub struct Receiver<L> {
    link: L,
    config: Config,
    abort: AbortHandle,
    state: ReceiverState,
    stats: TransferStats,
}

impl<L: Link> Receiver<L> {
    /// 새 수신자 생성
    pub fn new(link: L, config: Config) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            link,
            config,
            abort: AbortHandle::new(),
            state: ReceiverState::AwaitingReady,
            stats: TransferStats::new(),
        })
    }

    /// 외부 중단 핸들 사용
    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// 마지막 세션 통계
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn into_link(self) -> L {
        self.link
    }

    fn transition(&mut self, next: ReceiverState) {
        debug!("Receiver state: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// 세션 하나 수신
    ///
    /// 종료 마커까지 조립한 바이트 반환. 트레일러가 있으면 검증 실패 시
    /// `Error::IntegrityMismatch`
    pub async fn receive(&mut self) -> Result<Bytes> {
        self.stats = TransferStats::new();
        self.transition(ReceiverState::AwaitingReady);

        Handshake::new(&mut self.link, &self.config, &self.abort)
            .await_ready(&mut self.stats)
            .await?;

        self.transition(ReceiverState::AwaitingPacket);
        let (reassembler, trailer) = self.receive_packets().await?;
        self.transition(ReceiverState::SessionClosed);

        let result = reassembler.finish(trailer.as_ref());

        if let Err(e) = self.linger().await {
            debug!("Linger 종료: {}", e);
        }

        let data = result?;
        info!("Transfer complete: {}", self.stats.summary());
        Ok(data)
    }

    /// 세션 하나를 수신해 파일로 저장
    ///
    /// 임시 파일에 쓴 뒤 rename하므로 실패한 세션은 대상 파일을 건드리지 않음
    pub async fn receive_to_file(&mut self, path: impl AsRef<Path>) -> Result<TransferStats> {
        let path = path.as_ref();
        let data = self.receive().await?;

        let tmp = partial_path(path);
        if let Err(e) = write_atomically(&tmp, path, &data).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                debug!("임시 파일 삭제 실패 {}: {}", tmp.display(), cleanup);
            }
            return Err(e);
        }
        info!("Saved {} bytes to {}", data.len(), path.display());

        Ok(self.stats.clone())
    }

    /// 데이터 단계: 종료 마커까지 청크 수신
    async fn receive_packets(&mut self) -> Result<(Reassembler, Option<Trailer>)> {
        let format = self.config.wire_format;
        let idle_timeout = match self.config.idle_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        let mut reassembler = Reassembler::new();
        let mut last_valid = Instant::now();

        loop {
            self.abort.check()?;

            if let Some(idle) = idle_timeout {
                if last_valid.elapsed() >= idle {
                    return Err(Error::Timeout { phase: "데이터 수신" });
                }
            }

            let Some(bytes) = self.link.receive(self.config.receive_timeout()).await? else {
                self.stats.timeouts += 1;
                warn!("Timeout waiting for packet. Waiting again...");
                continue;
            };

            let packet = match format.decode(&bytes) {
                Ok(packet) => packet,
                Err(e) => {
                    self.stats.malformed_packets += 1;
                    warn!("Received malformed packet. Ignoring: {}", e);
                    continue;
                }
            };
            last_valid = Instant::now();

            match packet {
                Packet::Data { seq, payload } => match reassembler.accept(seq, &payload) {
                    Accepted::Appended => {
                        send_ack(&mut self.link, format, AckKind::Data(seq), &mut self.stats).await?;
                        self.stats.data_chunks += 1;
                        self.stats.total_bytes += payload.len() as u64;
                        debug!("Received chunk {} ({} bytes)", seq, payload.len());
                    }
                    Accepted::Duplicate => {
                        send_ack(&mut self.link, format, AckKind::Data(seq), &mut self.stats).await?;
                        self.stats.duplicate_chunks += 1;
                        debug!("중복 청크 {}, ACK 재전송", seq);
                    }
                    Accepted::OutOfOrder { expected } => {
                        warn!("순서 밖 청크 {} 버림 (기대 {})", seq, expected);
                    }
                },
                Packet::End(Some(trailer)) if !trailer_matches_counts(&trailer, &reassembler) => {
                    // 송신측은 모든 청크가 확인된 뒤에만 종료 마커를 보냄
                    self.stats.malformed_packets += 1;
                    warn!(
                        "청크 수/바이트 수가 맞지 않는 종료 마커 무시: {} chunks/{} bytes (수신 {}/{})",
                        trailer.total_chunks,
                        trailer.total_bytes,
                        reassembler.chunk_count(),
                        reassembler.len()
                    );
                }
                Packet::End(trailer) => {
                    send_ack(&mut self.link, format, AckKind::End, &mut self.stats).await?;
                    info!(
                        "END received ({} chunks, {} bytes)",
                        reassembler.chunk_count(),
                        reassembler.len()
                    );
                    return Ok((reassembler, trailer));
                }
                Packet::Ready(_) => {
                    // 핸드쉐이크 ACK 유실
                    send_ack(&mut self.link, format, AckKind::Ready, &mut self.stats).await?;
                    debug!("READY 재수신, ACK 재전송");
                }
                Packet::Ack(kind) => debug!("수신측에서 ACK 무시: {:?}", kind),
            }
        }
    }

    /// 종료 후 대기: 마지막 ACK가 유실된 송신측의 종료 마커 재전송에 응답
    async fn linger(&mut self) -> Result<()> {
        if self.config.close_linger_ms == 0 {
            return Ok(());
        }

        let format = self.config.wire_format;
        let deadline = Instant::now() + Duration::from_millis(self.config.close_linger_ms);

        loop {
            self.abort.check()?;

            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let wait = self.config.receive_timeout().min(deadline - now);

            let Some(bytes) = self.link.receive(wait).await? else {
                continue;
            };

            if let Ok(Packet::End(_)) = format.decode(&bytes) {
                send_ack(&mut self.link, format, AckKind::End, &mut self.stats).await?;
                debug!("END 재수신, ACK 재전송");
            }
        }
    }
}

/// 종료 마커 트레일러의 청크 수와 바이트 수가 조립 결과와 같은지
///
/// CRC는 `Reassembler::finish`에서 검증
fn trailer_matches_counts(trailer: &Trailer, reassembler: &Reassembler) -> bool {
    trailer.total_chunks == reassembler.chunk_count()
        && trailer.total_bytes == reassembler.len() as u64
}

/// 임시 파일에 쓴 뒤 대상 경로로 rename
async fn write_atomically(tmp: &Path, path: &Path, data: &[u8]) -> Result<()> {
    tokio::fs::write(tmp, data).await?;
    tokio::fs::rename(tmp, path).await?;
    Ok(())
}

/// `<path>.part`
fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::SequenceId;
    use crate::message::{Announce, WireFormat};
    use crate::simulator::{FaultConfig, SimulatedLink};
    use crate::PROTOCOL_VERSION;

    async fn push(peer: &mut SimulatedLink, format: WireFormat, packet: Packet) {
        let bytes = format.encode(&packet).unwrap();
        peer.transmit(&bytes).await.unwrap();
    }

    fn data(seq: u32, payload: &'static [u8]) -> Packet {
        Packet::Data {
            seq: SequenceId::new(seq),
            payload: Bytes::from_static(payload),
        }
    }

    fn ready() -> Packet {
        Packet::Ready(Some(Announce {
            version: PROTOCOL_VERSION,
            max_payload: 248,
        }))
    }

    /// `chunks`개 청크로 보낸 `content`의 종료 마커
    fn end(content: &[u8], chunks: u32) -> Packet {
        Packet::End(Some(Trailer {
            total_chunks: chunks,
            total_bytes: content.len() as u64,
            crc32: crc32fast::hash(content),
        }))
    }

    fn quiet_config() -> Config {
        Config {
            close_linger_ms: 0,
            ..Config::loopback()
        }
    }

    #[test]
    fn test_partial_path_appends_suffix() {
        assert_eq!(partial_path(Path::new("out/file.bin")), PathBuf::from("out/file.bin.part"));
    }

    #[tokio::test]
    async fn test_scripted_session_with_duplicate_and_gap() {
        let (link, mut peer) = SimulatedLink::pair(FaultConfig::lossless(), FaultConfig::lossless());
        let config = quiet_config();
        let format = config.wire_format;
        let mut receiver = Receiver::new(link, config).unwrap();
        assert_eq!(receiver.state(), ReceiverState::AwaitingReady);

        push(&mut peer, format, ready()).await;
        push(&mut peer, format, data(0, b"ab")).await;
        push(&mut peer, format, data(0, b"ab")).await;
        push(&mut peer, format, data(2, b"zz")).await;
        push(&mut peer, format, data(1, b"cd")).await;
        push(&mut peer, format, end(b"abcd", 2)).await;

        let output = receiver.receive().await.unwrap();
        assert_eq!(output.as_ref(), b"abcd");
        assert_eq!(receiver.state(), ReceiverState::SessionClosed);

        let stats = receiver.stats();
        assert_eq!(stats.duplicate_chunks, 1);
        assert_eq!(stats.data_chunks, 2);
        // Ready, 0, 0(중복), 1, End. 순서 밖 청크 2는 ACK 없음
        assert_eq!(stats.acks_sent, 5);

        let mut acks = Vec::new();
        while let Some(bytes) = peer.receive(Duration::from_millis(20)).await.unwrap() {
            acks.push(format.decode(&bytes).unwrap());
        }
        assert_eq!(
            acks,
            vec![
                Packet::Ack(AckKind::Ready),
                Packet::Ack(AckKind::Data(SequenceId::new(0))),
                Packet::Ack(AckKind::Data(SequenceId::new(0))),
                Packet::Ack(AckKind::Data(SequenceId::new(1))),
                Packet::Ack(AckKind::End),
            ]
        );
    }

    #[tokio::test]
    async fn test_ready_in_data_phase_is_reacknowledged() {
        let (link, mut peer) = SimulatedLink::pair(FaultConfig::lossless(), FaultConfig::lossless());
        let config = Config {
            wire_format: WireFormat::Ascii,
            ..quiet_config()
        };
        let mut receiver = Receiver::new(link, config).unwrap();

        for packet in [
            Packet::Ready(None),
            Packet::Ready(None),
            data(0, b"x"),
            Packet::End(None),
        ] {
            push(&mut peer, WireFormat::Ascii, packet).await;
        }

        let output = receiver.receive().await.unwrap();
        assert_eq!(output.as_ref(), b"x");
        assert_eq!(receiver.stats().acks_sent, 4);
    }

    #[tokio::test]
    async fn test_tag_shaped_noise_does_not_close_session() {
        let (link, mut peer) = SimulatedLink::pair(FaultConfig::lossless(), FaultConfig::lossless());
        let mut receiver = Receiver::new(link, quiet_config()).unwrap();

        push(&mut peer, WireFormat::Tagged, ready()).await;
        push(&mut peer, WireFormat::Tagged, data(0, b"ab")).await;
        // 종료 마커 태그 한 바이트
        peer.transmit(&[0xA4]).await.unwrap();
        // 아직 받지 않은 청크까지 센 종료 마커
        push(&mut peer, WireFormat::Tagged, end(b"abcd", 2)).await;
        let bogus = Trailer {
            total_chunks: 9,
            total_bytes: 2,
            crc32: 0,
        };
        push(&mut peer, WireFormat::Tagged, Packet::End(Some(bogus))).await;
        push(&mut peer, WireFormat::Tagged, data(1, b"cd")).await;
        push(&mut peer, WireFormat::Tagged, end(b"abcd", 2)).await;

        let output = receiver.receive().await.unwrap();
        assert_eq!(output.as_ref(), b"abcd");
        assert_eq!(receiver.stats().malformed_packets, 3);
        // Ready, 0, 1, End
        assert_eq!(receiver.stats().acks_sent, 4);
    }

    #[tokio::test]
    async fn test_integrity_mismatch_reported() {
        let (link, mut peer) = SimulatedLink::pair(FaultConfig::lossless(), FaultConfig::lossless());
        let mut receiver = Receiver::new(link, quiet_config()).unwrap();

        push(&mut peer, WireFormat::Tagged, ready()).await;
        push(&mut peer, WireFormat::Tagged, data(0, b"hello")).await;
        // 청크 수와 길이는 같고 내용만 다름
        push(&mut peer, WireFormat::Tagged, end(b"hellp", 1)).await;

        let result = receiver.receive().await;
        assert!(matches!(result, Err(Error::IntegrityMismatch { .. })));
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let (link, mut peer) = SimulatedLink::pair(FaultConfig::lossless(), FaultConfig::lossless());
        let config = Config {
            idle_timeout_ms: 100,
            ..Config::loopback()
        };
        let mut receiver = Receiver::new(link, config).unwrap();

        push(&mut peer, WireFormat::Tagged, ready()).await;

        let result = receiver.receive().await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert_eq!(receiver.state(), ReceiverState::AwaitingPacket);
    }

    #[tokio::test]
    async fn test_linger_reacknowledges_end() {
        let (link, mut peer) = SimulatedLink::pair(FaultConfig::lossless(), FaultConfig::lossless());
        let mut receiver = Receiver::new(link, Config::loopback()).unwrap();

        push(&mut peer, WireFormat::Tagged, ready()).await;
        push(&mut peer, WireFormat::Tagged, end(b"", 0)).await;
        // 종료 마커 재전송
        push(&mut peer, WireFormat::Tagged, end(b"", 0)).await;

        let output = receiver.receive().await.unwrap();
        assert!(output.is_empty());
        // Ready, End, End(재전송)
        assert_eq!(receiver.stats().acks_sent, 3);
    }

    #[tokio::test]
    async fn test_failed_save_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        // 대상 경로가 디렉터리면 rename 실패
        let target = dir.path().join("occupied");
        std::fs::create_dir(&target).unwrap();

        let (link, mut peer) = SimulatedLink::pair(FaultConfig::lossless(), FaultConfig::lossless());
        let mut receiver = Receiver::new(link, quiet_config()).unwrap();

        push(&mut peer, WireFormat::Tagged, ready()).await;
        push(&mut peer, WireFormat::Tagged, data(0, b"payload")).await;
        push(&mut peer, WireFormat::Tagged, end(b"payload", 1)).await;

        let result = receiver.receive_to_file(&target).await;
        assert!(matches!(result, Err(Error::Io(_))));
        assert!(!dir.path().join("occupied.part").exists());
        assert!(target.is_dir());
    }
}
