//! 링크 추상화
//!
//! 라디오 송수신기를 대신하는 인터페이스. 패킷 하나를 보내거나, 정해진 시간까지
//! 패킷 하나를 기다림. 전달/순서 보장 없음
//!
//! - `UdpLink`: UDP 데이터그램 소켓 (루프백/로컬 네트워크에서 라디오 대용)
//! - `SimulatedLink` (`simulator` 모듈): 테스트용 메모리 링크 + 장애 주입

use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{Error, Result, DEFAULT_MAX_PAYLOAD};

/// 패킷 링크
pub trait Link: Send {
    /// 패킷 하나의 최대 크기 (바이트)
    fn max_payload(&self) -> usize;

    /// 패킷 하나 전송
    ///
    /// `max_payload`보다 크면 `Error::PayloadTooLarge`
    fn transmit(&mut self, payload: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// 최대 `timeout` 동안 패킷 대기
    ///
    /// 시간 안에 도착하지 않으면 `Ok(None)`
    fn receive(&mut self, timeout: Duration) -> impl Future<Output = Result<Option<Bytes>>> + Send;
}

/// 링크 크기 제한 확인
pub(crate) fn check_payload(payload: &[u8], max: usize) -> Result<()> {
    if payload.len() > max {
        return Err(Error::PayloadTooLarge {
            size: payload.len(),
            max,
        });
    }
    Ok(())
}

/// UDP 기반 링크
///
/// 상대 주소로 connect된 소켓. 라디오처럼 패킷 크기를 `max_payload`로 제한
///
/// 수신 버퍼는 `max_payload + 1`바이트. 이보다 긴 데이터그램은 버림
#[derive(Debug)]
pub struct UdpLink {
    socket: UdpSocket,
    peer_addr: SocketAddr,
    max_payload: usize,
    buf: Vec<u8>,
}

impl UdpLink {
    /// `bind_addr`에 바인딩하고 `peer_addr`로 연결
    pub async fn connect(bind_addr: SocketAddr, peer_addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(peer_addr).await?;
        info!(
            "UDP link ready: {} -> {}",
            socket.local_addr()?,
            peer_addr
        );

        Ok(Self {
            socket,
            peer_addr,
            max_payload: DEFAULT_MAX_PAYLOAD,
            buf: vec![0u8; DEFAULT_MAX_PAYLOAD + 1],
        })
    }

    /// 최대 패킷 크기 변경
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self.buf = vec![0u8; max_payload + 1];
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl Link for UdpLink {
    fn max_payload(&self) -> usize {
        self.max_payload
    }

    async fn transmit(&mut self, payload: &[u8]) -> Result<()> {
        check_payload(payload, self.max_payload)?;

        match self.socket.send(payload).await {
            Ok(_) => Ok(()),
            // 상대가 아직 바인딩 전이면 ICMP로 거부됨. 라디오에서는 그냥 유실
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                debug!("전송 거부됨 (상대 미준비): {}", e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        let deadline = Instant::now() + timeout;

        loop {
            match tokio::time::timeout_at(deadline, self.socket.recv(&mut self.buf)).await {
                // 버퍼보다 긴 데이터그램은 잘려서 버퍼를 가득 채움
                Ok(Ok(len)) if len > self.max_payload => {
                    warn!(
                        "최대 크기를 넘는 데이터그램 버림 (최대 {} bytes)",
                        self.max_payload
                    );
                }
                Ok(Ok(len)) => return Ok(Some(Bytes::copy_from_slice(&self.buf[..len]))),
                Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                    debug!("수신 에러 무시 (상대 미준비): {}", e);
                    return Ok(None);
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Ok(None),
            }
        }
    }
}
