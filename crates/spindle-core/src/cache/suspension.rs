//! Suspension - 「確定したら呼び直す」という合図
//!
//! 同期で完了できない lookup は値の代わりに `Suspension` を返します。
//! 呼び出し側はそれを待ってから同じ lookup を繰り返します。エラーではなく値です。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

/// Something that eventually settles. Type-erased view of an `Awaitable`.
#[async_trait]
pub trait Settlement: Send + Sync {
    fn is_settled(&self) -> bool;

    async fn settled(&self);

    /// Address of the underlying slot; equal identities mean the same slot.
    fn identity(&self) -> usize;
}

#[derive(Clone)]
pub enum Suspension {
    /// Waiting on a single outstanding resolution.
    One(Arc<dyn Settlement>),
    /// Waiting until every listed resolution has settled, fulfilled or not.
    All(Vec<Arc<dyn Settlement>>),
}

impl Suspension {
    pub fn is_settled(&self) -> bool {
        match self {
            Suspension::One(one) => one.is_settled(),
            Suspension::All(all) => all.iter().all(|s| s.is_settled()),
        }
    }

    /// Resolves once the lookup is worth retrying.
    pub async fn settled(&self) {
        match self {
            Suspension::One(one) => one.settled().await,
            Suspension::All(all) => {
                for settlement in all {
                    settlement.settled().await;
                }
            }
        }
    }

    /// Number of resolutions this suspension waits on.
    pub fn len(&self) -> usize {
        match self {
            Suspension::One(_) => 1,
            Suspension::All(all) => all.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both suspensions wait on exactly the same slots.
    pub fn same_as(&self, other: &Suspension) -> bool {
        self.identities() == other.identities()
    }

    fn identities(&self) -> Vec<usize> {
        match self {
            Suspension::One(one) => vec![one.identity()],
            Suspension::All(all) => all.iter().map(|s| s.identity()).collect(),
        }
    }
}

impl fmt::Debug for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspension")
            .field("waiting_on", &self.len())
            .field("settled", &self.is_settled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Awaitable;
    use std::time::Duration;

    #[test]
    fn same_slot_means_same_suspension() {
        let awaitable = Awaitable::<i32>::pending();
        let other = Awaitable::<i32>::pending();
        assert!(awaitable.suspension().same_as(&awaitable.clone().suspension()));
        assert!(!awaitable.suspension().same_as(&other.suspension()));
    }

    #[tokio::test]
    async fn all_waits_for_every_member() {
        let first = Awaitable::<i32>::pending();
        let second = Awaitable::<i32>::pending();
        let suspension = Suspension::All(vec![
            Arc::new(first.clone()) as Arc<dyn Settlement>,
            Arc::new(second.clone()) as Arc<dyn Settlement>,
        ]);
        assert_eq!(suspension.len(), 2);

        first.complete(1);
        assert!(!suspension.is_settled());

        let settler = second.settler();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            settler.fail("second failed");
        });
        tokio::time::timeout(Duration::from_secs(1), suspension.settled())
            .await
            .unwrap();
        assert!(suspension.is_settled());
    }
}
