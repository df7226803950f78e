//! Confirmation depth arithmetic.

use crate::database::TxKind;

/// Depth above which a transaction is terminally confirmed.
pub const CONFIRMED_DEPTH: i64 = 6;

/// Display state of a transaction's depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Pending(i64),
    Confirmed,
}

/// Confirmations for a transaction mined at `tx_height` with the chain at
/// `chain_height`. Shielded outputs count one fewer than transparent ones.
pub fn confirmations(chain_height: i64, tx_height: i64, kind: TxKind) -> i64 {
    if tx_height <= 0 {
        return 0;
    }
    let depth = match kind {
        TxKind::Shielded => chain_height - tx_height,
        TxKind::Transparent => chain_height - tx_height + 1,
    };
    depth.max(0)
}

impl Confirmation {
    /// Classify a depth. `already_confirmed` is the latched flag from the
    /// cache; once set it wins over any later, lower reading.
    pub fn classify(depth: i64, already_confirmed: bool) -> Self {
        if already_confirmed || depth > CONFIRMED_DEPTH {
            Confirmation::Confirmed
        } else {
            Confirmation::Pending(depth)
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Confirmation::Confirmed)
    }
}
