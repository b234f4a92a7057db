//! 와이어 포맷 정의
//!
//! 두 가지 포맷을 지원
//! - `Ascii`: 기존 라디오 스크립트와 바이트 단위로 호환. 제어 패킷은 ASCII 토큰 전체,
//!   데이터 패킷은 10진 4자리 시퀀스 + 페이로드
//! - `Tagged`: 첫 바이트 태그로 제어/데이터를 구분. ACK에 확인 대상 단위를 싣고,
//!   종료 마커에 무결성 트레일러를 포함. 제어 패킷은 본문 길이가 정확히 맞아야 함
//!
//! 두 포맷 모두 데이터 헤더는 4바이트이므로 청크 용량은 `max_payload - 4`로 같음

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::chunk::SequenceId;
use crate::{Error, Result, HEADER_WIDTH};

/// 준비 완료 토큰 (ASCII)
pub const READY_TOKEN: &[u8] = b"READY_TO_SEND";

/// ACK 토큰 (ASCII)
pub const ACK_TOKEN: &[u8] = b"ACK";

/// 종료 마커 토큰 (ASCII)
///
/// 시퀀스 필드 폭과 같은 4바이트. 수신 시에는 이 접두사로 시작하는 패킷을 모두
/// 종료 마커로 취급 (`END_OF_FILE`을 보내는 기존 송신기 호환)
pub const END_TOKEN: &[u8] = b"END_";

/// ASCII 포맷 최대 시퀀스 번호
pub const ASCII_MAX_SEQUENCE: u32 = 9999;

/// Tagged 포맷 최대 시퀀스 번호 (24비트)
pub const TAGGED_MAX_SEQUENCE: u32 = 0x00FF_FFFF;

const TAG_READY: u8 = 0xA1;
const TAG_ACK: u8 = 0xA2;
const TAG_DATA: u8 = 0xA3;
const TAG_END: u8 = 0xA4;

const ACK_KIND_READY: u8 = 0x01;
const ACK_KIND_DATA: u8 = 0x02;
const ACK_KIND_END: u8 = 0x03;

/// bincode 고정 길이 본문 크기
const ANNOUNCE_LEN: usize = 3;
const TRAILER_LEN: usize = 16;

/// 와이어 포맷
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// 기존 ASCII 토큰 포맷
    Ascii,

    /// 태그 기반 포맷
    #[default]
    Tagged,
}

/// Ready 패킷 부가 정보 (Tagged 전용)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announce {
    /// 프로토콜 버전
    pub version: u8,

    /// 송신측 최대 패킷 크기
    pub max_payload: u16,
}

/// 종료 마커 트레일러 (Tagged 전용)
///
/// 수신측은 조립 결과를 이 값과 비교
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Trailer {
    /// 전송한 데이터 청크 수
    pub total_chunks: u32,

    /// 전송한 총 바이트
    pub total_bytes: u64,

    /// 전체 스트림 CRC32
    pub crc32: u32,
}

/// ACK가 확인하는 단위
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// 대상 미지정 (ASCII 포맷의 `ACK`). Tagged 포맷에서는 쓰지 않음
    Any,
    Ready,
    Data(SequenceId),
    End,
}

impl AckKind {
    /// 이 ACK가 `expected` 단위를 확인하는지 여부
    pub fn acknowledges(&self, expected: &AckKind) -> bool {
        matches!(self, AckKind::Any) || self == expected
    }
}

/// 와이어 위의 단위
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// 준비 완료 신호
    Ready(Option<Announce>),

    /// 확인 응답
    Ack(AckKind),

    /// 데이터 청크
    Data { seq: SequenceId, payload: Bytes },

    /// 종료 마커
    End(Option<Trailer>),
}

impl Packet {
    /// 이 단위에 대한 ACK 종류
    pub fn ack_kind(&self) -> AckKind {
        match self {
            Packet::Ready(_) => AckKind::Ready,
            Packet::Ack(_) => AckKind::Any,
            Packet::Data { seq, .. } => AckKind::Data(*seq),
            Packet::End(_) => AckKind::End,
        }
    }

    /// 로그용 짧은 설명
    pub fn describe(&self) -> String {
        match self {
            Packet::Ready(_) => "Ready".to_string(),
            Packet::Ack(kind) => format!("Ack({:?})", kind),
            Packet::Data { seq, payload } => format!("Data {} ({} bytes)", seq, payload.len()),
            Packet::End(_) => "End".to_string(),
        }
    }
}

impl WireFormat {
    /// 이 포맷으로 표현 가능한 최대 시퀀스 번호
    pub fn max_sequence(&self) -> u32 {
        match self {
            WireFormat::Ascii => ASCII_MAX_SEQUENCE,
            WireFormat::Tagged => TAGGED_MAX_SEQUENCE,
        }
    }

    /// 패킷을 바이트로 직렬화
    pub fn encode(&self, packet: &Packet) -> Result<Bytes> {
        if let Packet::Data { seq, .. } = packet {
            if seq.value() > self.max_sequence() {
                return Err(Error::SequenceOverflow {
                    max: self.max_sequence(),
                });
            }
        }

        match self {
            WireFormat::Ascii => Ok(encode_ascii(packet)),
            WireFormat::Tagged => encode_tagged(packet),
        }
    }

    /// 바이트에서 패킷 역직렬화
    ///
    /// 해석할 수 없는 패킷은 `Error::MalformedPacket`
    pub fn decode(&self, bytes: &[u8]) -> Result<Packet> {
        match self {
            WireFormat::Ascii => decode_ascii(bytes),
            WireFormat::Tagged => decode_tagged(bytes),
        }
    }
}

fn encode_ascii(packet: &Packet) -> Bytes {
    match packet {
        Packet::Ready(_) => Bytes::from_static(READY_TOKEN),
        Packet::Ack(_) => Bytes::from_static(ACK_TOKEN),
        Packet::End(_) => Bytes::from_static(END_TOKEN),
        Packet::Data { seq, payload } => {
            let mut buf = BytesMut::with_capacity(HEADER_WIDTH + payload.len());
            buf.put_slice(format!("{:04}", seq.value()).as_bytes());
            buf.put_slice(payload);
            buf.freeze()
        }
    }
}

fn decode_ascii(bytes: &[u8]) -> Result<Packet> {
    if bytes == READY_TOKEN {
        return Ok(Packet::Ready(None));
    }
    if bytes == ACK_TOKEN {
        return Ok(Packet::Ack(AckKind::Any));
    }
    if bytes.starts_with(END_TOKEN) {
        return Ok(Packet::End(None));
    }
    if bytes.len() < HEADER_WIDTH {
        return Err(Error::MalformedPacket(format!(
            "{} bytes 패킷은 시퀀스 필드보다 짧음",
            bytes.len()
        )));
    }

    let (prefix, payload) = bytes.split_at(HEADER_WIDTH);
    if !prefix.iter().all(u8::is_ascii_digit) {
        return Err(Error::MalformedPacket(format!(
            "시퀀스 필드가 10진수가 아님: {:02X?}",
            prefix
        )));
    }

    let seq = prefix
        .iter()
        .fold(0u32, |acc, digit| acc * 10 + u32::from(digit - b'0'));

    Ok(Packet::Data {
        seq: SequenceId::new(seq),
        payload: Bytes::copy_from_slice(payload),
    })
}

fn encode_tagged(packet: &Packet) -> Result<Bytes> {
    let mut buf = BytesMut::new();

    match packet {
        Packet::Ready(announce) => {
            let announce = announce
                .ok_or_else(|| Error::MalformedPacket("Tagged Ready에는 Announce 필요".into()))?;
            buf.put_u8(TAG_READY);
            buf.put_slice(&bincode::serialize(&announce)?);
        }
        Packet::Ack(kind) => {
            let (kind_byte, seq) = match kind {
                AckKind::Any => {
                    return Err(Error::MalformedPacket("Tagged ACK에는 대상 단위 필요".into()))
                }
                AckKind::Ready => (ACK_KIND_READY, 0),
                AckKind::Data(seq) => (ACK_KIND_DATA, seq.value()),
                AckKind::End => (ACK_KIND_END, 0),
            };
            buf.put_u8(TAG_ACK);
            buf.put_u8(kind_byte);
            buf.put_uint(u64::from(seq), 3);
        }
        Packet::Data { seq, payload } => {
            buf.reserve(HEADER_WIDTH + payload.len());
            buf.put_u8(TAG_DATA);
            buf.put_uint(u64::from(seq.value()), 3);
            buf.put_slice(payload);
        }
        Packet::End(trailer) => {
            let trailer = trailer
                .ok_or_else(|| Error::MalformedPacket("Tagged End에는 Trailer 필요".into()))?;
            buf.put_u8(TAG_END);
            buf.put_slice(&bincode::serialize(&trailer)?);
        }
    }

    Ok(buf.freeze())
}

fn decode_tagged(bytes: &[u8]) -> Result<Packet> {
    let mut buf = bytes;
    if !buf.has_remaining() {
        return Err(Error::MalformedPacket("빈 패킷".into()));
    }

    match buf.get_u8() {
        TAG_READY => {
            if buf.len() != ANNOUNCE_LEN {
                return Err(Error::MalformedPacket(format!(
                    "Ready 길이 불일치: {} bytes",
                    bytes.len()
                )));
            }
            let announce: Announce = bincode::deserialize(buf)
                .map_err(|e| Error::MalformedPacket(format!("Announce 역직렬화 실패: {}", e)))?;
            Ok(Packet::Ready(Some(announce)))
        }
        TAG_ACK => {
            if buf.remaining() != 4 {
                return Err(Error::MalformedPacket(format!(
                    "ACK 길이 불일치: {} bytes",
                    bytes.len()
                )));
            }
            let kind = buf.get_u8();
            let seq = buf.get_uint(3) as u32;
            let kind = match kind {
                ACK_KIND_READY => AckKind::Ready,
                ACK_KIND_DATA => AckKind::Data(SequenceId::new(seq)),
                ACK_KIND_END => AckKind::End,
                other => {
                    return Err(Error::MalformedPacket(format!(
                        "알 수 없는 ACK 종류 0x{:02X}",
                        other
                    )))
                }
            };
            Ok(Packet::Ack(kind))
        }
        TAG_DATA => {
            if buf.remaining() < HEADER_WIDTH - 1 {
                return Err(Error::MalformedPacket(format!(
                    "데이터 헤더 잘림: {} bytes",
                    bytes.len()
                )));
            }
            let seq = buf.get_uint(3) as u32;
            Ok(Packet::Data {
                seq: SequenceId::new(seq),
                payload: Bytes::copy_from_slice(buf),
            })
        }
        TAG_END => {
            if buf.len() != TRAILER_LEN {
                return Err(Error::MalformedPacket(format!(
                    "End 길이 불일치: {} bytes",
                    bytes.len()
                )));
            }
            let trailer: Trailer = bincode::deserialize(buf)
                .map_err(|e| Error::MalformedPacket(format!("Trailer 역직렬화 실패: {}", e)))?;
            Ok(Packet::End(Some(trailer)))
        }
        other => Err(Error::MalformedPacket(format!("알 수 없는 태그 0x{:02X}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(seq: u32, payload: &[u8]) -> Packet {
        Packet::Data {
            seq: SequenceId::new(seq),
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[test]
    fn test_ascii_data_layout() {
        let bytes = WireFormat::Ascii.encode(&data(7, b"hello")).unwrap();
        assert_eq!(&bytes[..], b"0007hello");

        let decoded = WireFormat::Ascii.decode(&bytes).unwrap();
        assert_eq!(decoded, data(7, b"hello"));
    }

    #[test]
    fn test_ascii_control_tokens() {
        let format = WireFormat::Ascii;
        assert_eq!(&format.encode(&Packet::Ready(None)).unwrap()[..], b"READY_TO_SEND");
        assert_eq!(&format.encode(&Packet::Ack(AckKind::Data(SequenceId::new(3)))).unwrap()[..], b"ACK");
        assert_eq!(&format.encode(&Packet::End(None)).unwrap()[..], b"END_");

        assert_eq!(format.decode(b"READY_TO_SEND").unwrap(), Packet::Ready(None));
        assert_eq!(format.decode(b"ACK").unwrap(), Packet::Ack(AckKind::Any));
        assert_eq!(format.decode(b"END_").unwrap(), Packet::End(None));
    }

    #[test]
    fn test_ascii_accepts_long_end_marker() {
        let decoded = WireFormat::Ascii.decode(b"END_OF_FILE").unwrap();
        assert_eq!(decoded, Packet::End(None));
    }

    #[test]
    fn test_ascii_rejects_noise() {
        let format = WireFormat::Ascii;
        assert!(matches!(format.decode(&[0xFF, 0xFE, 0x00, 0x10, 0x20]), Err(Error::MalformedPacket(_))));
        assert!(matches!(format.decode(b"12"), Err(Error::MalformedPacket(_))));
        assert!(matches!(format.decode(b"READY"), Err(Error::MalformedPacket(_))));
        assert!(matches!(format.decode(b"ACKS"), Err(Error::MalformedPacket(_))));
    }

    #[test]
    fn test_ascii_sequence_limit() {
        assert!(WireFormat::Ascii.encode(&data(9999, b"x")).is_ok());
        assert!(matches!(
            WireFormat::Ascii.encode(&data(10_000, b"x")),
            Err(Error::SequenceOverflow { max: 9999 })
        ));
    }

    #[test]
    fn test_tagged_header_is_four_bytes() {
        let bytes = WireFormat::Tagged.encode(&data(0x010203, b"abc")).unwrap();
        assert_eq!(&bytes[..HEADER_WIDTH], &[TAG_DATA, 0x01, 0x02, 0x03]);
        assert_eq!(&bytes[HEADER_WIDTH..], b"abc");
    }

    #[test]
    fn test_tagged_ack_identifies_unit() {
        let format = WireFormat::Tagged;
        let ack = format
            .encode(&Packet::Ack(AckKind::Data(SequenceId::new(42))))
            .unwrap();
        let decoded = format.decode(&ack).unwrap();

        let Packet::Ack(kind) = decoded else {
            panic!("ACK가 아님");
        };
        assert!(kind.acknowledges(&AckKind::Data(SequenceId::new(42))));
        assert!(!kind.acknowledges(&AckKind::Data(SequenceId::new(43))));
        assert!(!kind.acknowledges(&AckKind::End));
    }

    #[test]
    fn test_tagged_end_carries_trailer() {
        let trailer = Trailer {
            total_chunks: 3,
            total_bytes: 600,
            crc32: 0xDEADBEEF,
        };
        let bytes = WireFormat::Tagged.encode(&Packet::End(Some(trailer))).unwrap();
        assert_eq!(WireFormat::Tagged.decode(&bytes).unwrap(), Packet::End(Some(trailer)));
    }

    #[test]
    fn test_tagged_ready_carries_announce() {
        let announce = Announce {
            version: crate::PROTOCOL_VERSION,
            max_payload: 248,
        };
        let bytes = WireFormat::Tagged.encode(&Packet::Ready(Some(announce))).unwrap();
        assert_eq!(WireFormat::Tagged.decode(&bytes).unwrap(), Packet::Ready(Some(announce)));
    }

    #[test]
    fn test_tagged_rejects_unknown_and_truncated() {
        let format = WireFormat::Tagged;
        assert!(matches!(format.decode(&[]), Err(Error::MalformedPacket(_))));
        assert!(matches!(format.decode(b"0001abc"), Err(Error::MalformedPacket(_))));
        assert!(matches!(format.decode(&[TAG_DATA, 0x00]), Err(Error::MalformedPacket(_))));
        assert!(matches!(format.decode(&[TAG_ACK, ACK_KIND_DATA, 0x00]), Err(Error::MalformedPacket(_))));
        assert!(matches!(format.decode(&[TAG_ACK, 0x09, 0, 0, 0]), Err(Error::MalformedPacket(_))));
    }

    #[test]
    fn test_tagged_control_packets_need_exact_body() {
        let format = WireFormat::Tagged;
        // 태그 한 바이트짜리 잡음이 종료 마커로 읽히면 안 됨
        assert!(matches!(format.decode(&[TAG_END]), Err(Error::MalformedPacket(_))));
        assert!(matches!(format.decode(&[TAG_READY]), Err(Error::MalformedPacket(_))));
        assert!(matches!(format.decode(&[TAG_END, 0, 0, 0]), Err(Error::MalformedPacket(_))));
        assert!(matches!(format.decode(&[TAG_READY, 1, 0xF8, 0, 0]), Err(Error::MalformedPacket(_))));
        assert!(matches!(format.decode(&[TAG_ACK, 0x00, 0, 0, 0]), Err(Error::MalformedPacket(_))));

        assert!(matches!(format.encode(&Packet::End(None)), Err(Error::MalformedPacket(_))));
        assert!(matches!(format.encode(&Packet::Ready(None)), Err(Error::MalformedPacket(_))));
        assert!(matches!(format.encode(&Packet::Ack(AckKind::Any)), Err(Error::MalformedPacket(_))));
    }

    #[test]
    fn test_any_ack_acknowledges_everything() {
        assert!(AckKind::Any.acknowledges(&AckKind::Ready));
        assert!(AckKind::Any.acknowledges(&AckKind::End));
        assert!(!AckKind::Ready.acknowledges(&AckKind::End));
    }
}
