use crate::peer::types::IceCandidate;

/// Кандидаты, полученные до установки remote description.
///
/// Только добавление до первого `drain`; после него буфер пуст навсегда и
/// кандидаты применяются сразу.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: Vec<IceCandidate>,
    drained: bool,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ставит кандидат в очередь. После `drain` возвращает его обратно
    /// вызывающему, чтобы тот применил его сам.
    pub fn push(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.drained {
            return Some(candidate);
        }
        self.pending.push(candidate);
        None
    }

    /// Забирает кандидатов в порядке поступления. Срабатывает один раз.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        if self.drained {
            return Vec::new();
        }
        self.drained = true;
        std::mem::take(&mut self.pending)
    }

    /// Выбрасывает накопленное, буфер остаётся открытым
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(n: u32) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{n} 1 udp 1 10.0.0.{n} 5000 typ host"),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[test]
    fn test_drain_keeps_arrival_order() {
        let mut buf = CandidateBuffer::new();
        for n in 1..=3 {
            assert!(buf.push(cand(n)).is_none());
        }
        assert_eq!(buf.len(), 3);

        let drained = buf.drain();
        assert_eq!(drained, vec![cand(1), cand(2), cand(3)]);
        assert!(buf.is_empty());
        assert!(buf.is_drained());
    }

    #[test]
    fn test_drain_happens_once() {
        let mut buf = CandidateBuffer::new();
        buf.push(cand(1));
        assert_eq!(buf.drain().len(), 1);
        assert!(buf.drain().is_empty());
    }

    #[test]
    fn test_clear_keeps_buffering() {
        let mut buf = CandidateBuffer::new();
        buf.push(cand(1));
        buf.push(cand(2));
        assert_eq!(buf.clear(), 2);
        assert!(!buf.is_drained());
        assert!(buf.push(cand(3)).is_none());
        assert_eq!(buf.drain(), vec![cand(3)]);
    }

    #[test]
    fn test_push_after_drain_is_handed_back() {
        let mut buf = CandidateBuffer::new();
        buf.drain();
        assert_eq!(buf.push(cand(7)), Some(cand(7)));
        assert!(buf.is_empty());
    }
}
