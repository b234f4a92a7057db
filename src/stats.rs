//! 전송 통계

use std::time::{Duration, Instant};

/// 한 세션의 전송 통계
///
/// 송신측과 수신측이 같은 구조체를 쓰며, 각자 해당하는 항목만 증가
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// Ready 전송 횟수
    pub handshake_attempts: u64,

    /// 전송한 단위 수 (재전송 포함)
    pub units_sent: u64,

    /// 전달 확인된 데이터 청크 수
    pub data_chunks: u64,

    /// 재전송 수
    pub retransmissions: u64,

    /// 보낸 ACK 수
    pub acks_sent: u64,

    /// 받은 유효 ACK 수
    pub acks_received: u64,

    /// 현재 단위와 맞지 않는 ACK 수 (무시됨)
    pub stale_acks: u64,

    /// 중복 수신 청크 수
    pub duplicate_chunks: u64,

    /// 해석 불가 패킷 수
    pub malformed_packets: u64,

    /// 패킷 없이 끝난 폴링 수
    pub timeouts: u64,

    /// 페이로드 바이트 (송신: 확인된 바이트, 수신: 조립된 바이트)
    pub total_bytes: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            handshake_attempts: 0,
            units_sent: 0,
            data_chunks: 0,
            retransmissions: 0,
            acks_sent: 0,
            acks_received: 0,
            stale_acks: 0,
            duplicate_chunks: 0,
            malformed_packets: 0,
            timeouts: 0,
            total_bytes: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed
    }

    /// 전송 중 재전송 비율
    pub fn retransmission_ratio(&self) -> f64 {
        if self.units_sent == 0 {
            return 0.0;
        }
        self.retransmissions as f64 / self.units_sent as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Chunks: {} | Bytes: {} | Throughput: {:.1} B/s | Retransmit: {:.1}% | ACKs: {}/{} | Dup: {} | Malformed: {} | Timeouts: {}",
            self.elapsed().as_secs_f64(),
            self.data_chunks,
            self.total_bytes,
            self.throughput(),
            self.retransmission_ratio() * 100.0,
            self.acks_received,
            self.acks_sent,
            self.duplicate_chunks,
            self.malformed_packets,
            self.timeouts,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retransmission_ratio() {
        let mut stats = TransferStats::new();
        assert_eq!(stats.retransmission_ratio(), 0.0);

        stats.units_sent = 10;
        stats.retransmissions = 3;
        assert!((stats.retransmission_ratio() - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary_mentions_counts() {
        let mut stats = TransferStats::new();
        stats.data_chunks = 3;
        stats.total_bytes = 600;

        let summary = stats.summary();
        assert!(summary.contains("Chunks: 3"));
        assert!(summary.contains("Bytes: 600"));
    }
}
