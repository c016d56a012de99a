//! `TransactionInfo`'s sub-type discriminator, patterned on an XA
//! resource-manager's operation dispatch: `xa_start`/`xa_end`/
//! `xa_prepare`/`xa_commit`/`xa_rollback`/`xa_recover`/`xa_forget`.

/// Any wire value outside this set is a fatal protocol error; the enum
/// being closed is what enforces that in the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionKind {
    Begin = 0,
    Prepare = 1,
    Commit1Phase = 2,
    Commit2Phase = 3,
    End = 4,
    Rollback = 5,
    Recover = 6,
    Forget = 7,
}

impl TransactionKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        use TransactionKind::*;
        Some(match b {
            0 => Begin,
            1 => Prepare,
            2 => Commit1Phase,
            3 => Commit2Phase,
            4 => End,
            5 => Rollback,
            6 => Recover,
            7 => Forget,
            _ => return None,
        })
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod test {
    use super::TransactionKind;

    #[test]
    fn round_trips_every_kind() {
        for b in 0..=7u8 {
            let kind = TransactionKind::from_byte(b).expect("known discriminator");
            assert_eq!(kind.to_byte(), b);
        }
        assert!(TransactionKind::from_byte(8).is_none());
    }
}
