//! 협력적 취소

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{Error, Result};

/// 전송 중단 핸들
///
/// 복제해서 다른 태스크에 넘길 수 있음. 송수신 루프는 폴링 사이마다 확인
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 중단 요청
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// 중단 요청 여부
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// 중단 요청 시 `Error::Aborted` 반환
    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            return Err(Error::Aborted);
        }
        Ok(())
    }
}
