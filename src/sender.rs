//! 송신자
//!
//! 핸드쉐이크 → 청크 단위 Stop-and-Wait 전달 → 종료 마커

use std::path::Path;

use tokio::io::{AsyncRead, BufReader};
use tracing::info;

use crate::chunk::Chunker;
use crate::delivery::DeliveryEngine;
use crate::handshake::Handshake;
use crate::link::Link;
use crate::message::{Packet, WireFormat};
use crate::stats::TransferStats;
use crate::{AbortHandle, Config, Error, Result};

/// 송신자
pub struct Sender<L> {
    /// 링크
    link: L,

    /// 설정
    config: Config,

    /// 중단 핸들
    abort: AbortHandle,

    /// 마지막 전송 통계
    stats: TransferStats,
}

impl<L: Link> Sender<L> {
    /// 새 송신자 생성
    ///
    /// 설정의 패킷 크기가 링크 한도를 넘으면 `Error::InvalidConfig`
    pub fn new(link: L, config: Config) -> Result<Self> {
        config.validate()?;
        if config.max_payload > link.max_payload() {
            return Err(Error::InvalidConfig(format!(
                "max_payload {}가 링크 한도 {}보다 큼",
                config.max_payload,
                link.max_payload()
            )));
        }

        Ok(Self {
            link,
            config,
            abort: AbortHandle::new(),
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

    /// 바이트 스트림 전송
    ///
    /// 수신측이 종료 마커를 확인하면 통계를 반환
    pub async fn send_stream<R: AsyncRead + Unpin>(&mut self, reader: R) -> Result<TransferStats> {
        self.stats = TransferStats::new();

        let config = &self.config;
        let abort = &self.abort;
        let link = &mut self.link;
        let stats = &mut self.stats;

        Handshake::new(&mut *link, config, abort)
            .announce_ready(stats)
            .await?;

        let mut chunker = Chunker::from_config(reader, config);
        let mut engine = DeliveryEngine::new(link, config, abort);

        while let Some(chunk) = chunker.next_chunk().await? {
            let len = chunk.data.len() as u64;
            let packet = Packet::Data {
                seq: chunk.seq,
                payload: chunk.data,
            };
            engine.deliver(&packet, stats).await?;

            stats.data_chunks += 1;
            stats.total_bytes += len;
        }

        let trailer = chunker.trailer();
        let end = match config.wire_format {
            WireFormat::Tagged => Packet::End(Some(trailer)),
            WireFormat::Ascii => Packet::End(None),
        };
        info!("Sending END ({} chunks, {} bytes)", trailer.total_chunks, trailer.total_bytes);
        engine.deliver(&end, stats).await?;

        info!("Transfer complete: {}", stats.summary());
        Ok(stats.clone())
    }

    /// 메모리 버퍼 전송
    pub async fn send_bytes(&mut self, data: &[u8]) -> Result<TransferStats> {
        self.send_stream(data).await
    }

    /// 파일 전송
    pub async fn send_file(&mut self, path: impl AsRef<Path>) -> Result<TransferStats> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        info!("Sending file {} ({} bytes)", path.display(), file.metadata().await?.len());

        self.send_stream(BufReader::new(file)).await
    }

    /// 마지막 전송 통계
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 링크 회수
    pub fn into_link(self) -> L {
        self.link
    }
}
