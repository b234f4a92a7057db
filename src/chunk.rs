//! 청크 분할과 조립
//!
//! - Chunker: 송신측. 바이트 스트림을 시퀀스 번호가 붙은 고정 용량 청크로 분할
//! - Reassembler: 수신측. 도착 순서대로 페이로드를 이어 붙이고 중복을 걸러냄

use std::fmt;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::message::{Trailer, WireFormat};
use crate::{Config, Error, Result};

/// 시퀀스 번호
///
/// 전송마다 0부터 시작해 청크당 1씩 증가. 재사용하지 않음
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceId(u32);

impl SequenceId {
    pub const ZERO: SequenceId = SequenceId(0);

    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// 다음 시퀀스 번호
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// 청크 (데이터 패킷 단위)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 시퀀스 번호
    pub seq: SequenceId,

    /// 실제 데이터
    pub data: Bytes,
}

/// 청크 생성기 (송신측)
///
/// 지연 평가, 유한, 재시작 불가. 전송마다 새로 만들어야 함
pub struct Chunker<R> {
    reader: R,

    /// 청크당 최대 페이로드 (바이트)
    capacity: usize,

    /// 와이어 포맷이 표현 가능한 최대 시퀀스 번호
    max_sequence: u32,

    next_seq: SequenceId,
    exhausted: bool,

    hasher: crc32fast::Hasher,
    total_bytes: u64,
    total_chunks: u32,
}

impl<R: AsyncRead + Unpin> Chunker<R> {
    pub fn new(reader: R, capacity: usize, format: WireFormat) -> Self {
        Self {
            reader,
            capacity,
            max_sequence: format.max_sequence(),
            next_seq: SequenceId::ZERO,
            exhausted: false,
            hasher: crc32fast::Hasher::new(),
            total_bytes: 0,
            total_chunks: 0,
        }
    }

    /// 설정의 패킷 크기와 포맷으로 생성
    pub fn from_config(reader: R, config: &Config) -> Self {
        Self::new(reader, config.chunk_capacity(), config.wire_format)
    }

    /// 다음 청크
    ///
    /// 소스가 끝나면 `Ok(None)`. 이후 호출도 계속 `Ok(None)`
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.exhausted {
            return Ok(None);
        }

        // 블록을 끝까지 채움 (짧은 read는 소스 끝에서만 허용)
        let mut buf = vec![0u8; self.capacity];
        let mut filled = 0;
        while filled < self.capacity {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                self.exhausted = true;
                break;
            }
            filled += n;
        }

        if filled == 0 {
            self.exhausted = true;
            return Ok(None);
        }

        if self.next_seq.value() > self.max_sequence {
            return Err(Error::SequenceOverflow {
                max: self.max_sequence,
            });
        }

        buf.truncate(filled);
        self.hasher.update(&buf);
        self.total_bytes += filled as u64;
        self.total_chunks += 1;

        let seq = self.next_seq;
        self.next_seq = seq.next();

        Ok(Some(Chunk {
            seq,
            data: Bytes::from(buf),
        }))
    }

    /// 지금까지 생성한 청크의 트레일러
    pub fn trailer(&self) -> Trailer {
        Trailer {
            total_chunks: self.total_chunks,
            total_bytes: self.total_bytes,
            crc32: self.hasher.clone().finalize(),
        }
    }

    /// 소스 소진 여부
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// 청크 수락 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// 다음 청크, 버퍼에 추가됨
    Appended,

    /// 이미 받은 청크 (ACK 유실로 인한 재전송)
    Duplicate,

    /// 아직 받을 차례가 아닌 청크
    OutOfOrder { expected: SequenceId },
}

/// 청크 조립기 (수신측)
pub struct Reassembler {
    buffer: BytesMut,
    next_seq: SequenceId,
    hasher: crc32fast::Hasher,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            next_seq: SequenceId::ZERO,
            hasher: crc32fast::Hasher::new(),
        }
    }

    /// 청크 수락
    pub fn accept(&mut self, seq: SequenceId, payload: &[u8]) -> Accepted {
        if seq < self.next_seq {
            return Accepted::Duplicate;
        }
        if seq > self.next_seq {
            return Accepted::OutOfOrder {
                expected: self.next_seq,
            };
        }

        self.buffer.extend_from_slice(payload);
        self.hasher.update(payload);
        self.next_seq = seq.next();
        Accepted::Appended
    }

    /// 다음에 받을 시퀀스 번호
    pub fn next_expected(&self) -> SequenceId {
        self.next_seq
    }

    /// 수락한 청크 수
    pub fn chunk_count(&self) -> u32 {
        self.next_seq.value()
    }

    /// 조립된 바이트 수
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// 세션 종료, 조립된 데이터 추출
    ///
    /// 트레일러가 있으면 청크 수, 바이트 수, CRC32를 검증
    pub fn finish(self, trailer: Option<&Trailer>) -> Result<Bytes> {
        if let Some(trailer) = trailer {
            let got_crc = self.hasher.clone().finalize();
            let got_bytes = self.buffer.len() as u64;
            let got_chunks = self.chunk_count();

            if trailer.crc32 != got_crc
                || trailer.total_bytes != got_bytes
                || trailer.total_chunks != got_chunks
            {
                return Err(Error::IntegrityMismatch {
                    expected_chunks: trailer.total_chunks,
                    got_chunks,
                    expected_bytes: trailer.total_bytes,
                    got_bytes,
                    expected_crc: trailer.crc32,
                    got_crc,
                });
            }
        }

        Ok(self.buffer.freeze())
    }
}
