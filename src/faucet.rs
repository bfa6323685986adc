//! One-time payout per address. Marking the account and broadcasting are two
//! separate writes, so an in-process mutex keeps concurrent claims for the
//! same address from both passing the check.

use crate::chain::Coin;
use crate::model::docs::AccountDoc;
use crate::model::ids::is_account_address;
use crate::store::{DocKind, Document, DocumentStore};
use anyhow::{ensure, Context, Result};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Placeholder stored while the payout is being broadcast.
pub const PENDING_AIRDROP: &str = "pending";

/// Signs and broadcasts the payout transaction, returning its hash.
pub trait FaucetBroadcaster: Send + Sync {
    fn send<'a>(&'a self, address: &'a str, amount: &'a Coin) -> BoxFuture<'a, Result<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Sent { tx_hash: String },
    AlreadyClaimed,
}

pub struct Faucet {
    store: Arc<dyn DocumentStore>,
    broadcaster: Arc<dyn FaucetBroadcaster>,
    amount: Coin,
    guard: Mutex<()>,
}

impl Faucet {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        broadcaster: Arc<dyn FaucetBroadcaster>,
        amount: Coin,
    ) -> Self {
        Self {
            store,
            broadcaster,
            amount,
            guard: Mutex::new(()),
        }
    }

    pub async fn claim(&self, address: &str) -> Result<ClaimOutcome> {
        ensure!(is_account_address(address), "{address} is not an account address");
        let _claim = self.guard.lock().await;

        let previous = self.load_account(address).await?;
        if previous.as_ref().is_some_and(AccountDoc::airdropped) {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        let mut account = previous.clone().unwrap_or_else(|| AccountDoc {
            address: address.to_string(),
            first_seen_block: 0,
            airdrop_tx_hash: None,
        });
        account.airdrop_tx_hash = Some(PENDING_AIRDROP.to_string());
        self.save(account.clone())
            .await
            .context("failed to mark airdrop as sent")?;

        match self.broadcaster.send(address, &self.amount).await {
            Ok(tx_hash) => {
                account.airdrop_tx_hash = Some(tx_hash.clone());
                self.save(account)
                    .await
                    .context("failed to record airdrop transaction")?;
                info!(address, tx_hash = %tx_hash, amount = self.amount.amount, denom = %self.amount.denom, "airdrop sent");
                Ok(ClaimOutcome::Sent { tx_hash })
            }
            Err(err) => {
                warn!(address, error = %format!("{err:#}"), "airdrop broadcast failed; reverting mark");
                let revert = match previous {
                    Some(previous) => self.save(previous).await,
                    None => self
                        .store
                        .delete(DocKind::Accounts, address, None)
                        .await
                        .map_err(anyhow::Error::from),
                };
                if let Err(revert_err) = revert {
                    warn!(address, error = %revert_err, "failed to revert airdrop mark");
                }
                Err(err.context(format!("airdrop to {address} failed")))
            }
        }
    }

    async fn load_account(&self, address: &str) -> Result<Option<AccountDoc>> {
        let ids = [address.to_string()];
        let docs = self
            .store
            .get_many(DocKind::Accounts, &ids)
            .await
            .context("failed to load account")?;
        Ok(docs.into_iter().find_map(|doc| match doc {
            Document::Account(account) => Some(account),
            _ => None,
        }))
    }

    async fn save(&self, account: AccountDoc) -> Result<()> {
        self.store.put(Document::Account(account), None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DocsCache, FlushMode, FlushOptions};
    use crate::store::MemoryStore;
    use anyhow::bail;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    const ALICE: &str = "cosmos1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu";

    #[derive(Default)]
    struct Broadcaster {
        sent: AtomicUsize,
        fail: AtomicBool,
    }

    impl FaucetBroadcaster for Broadcaster {
        fn send<'a>(&'a self, _address: &'a str, _amount: &'a Coin) -> BoxFuture<'a, Result<String>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if self.fail.load(Ordering::SeqCst) {
                    bail!("node rejected broadcast");
                }
                let n = self.sent.fetch_add(1, Ordering::SeqCst);
                Ok(format!("{n:064X}"))
            })
        }
    }

    fn faucet(store: Arc<MemoryStore>, broadcaster: Arc<Broadcaster>) -> Arc<Faucet> {
        Arc::new(Faucet::new(
            store,
            broadcaster,
            Coin {
                denom: "ubadge".into(),
                amount: 1_000,
            },
        ))
    }

    fn stored_account(store: &MemoryStore) -> Option<AccountDoc> {
        match store.get(DocKind::Accounts, ALICE) {
            Some(Document::Account(account)) => Some(account),
            _ => None,
        }
    }

    #[tokio::test]
    async fn concurrent_claims_pay_once() {
        let store = Arc::new(MemoryStore::new());
        let broadcaster = Arc::new(Broadcaster::default());
        let faucet = faucet(store.clone(), broadcaster.clone());

        let (first, second) = tokio::join!(faucet.claim(ALICE), faucet.claim(ALICE));
        let outcomes = [first.unwrap(), second.unwrap()];

        assert_eq!(broadcaster.sent.load(Ordering::SeqCst), 1);
        assert!(outcomes.contains(&ClaimOutcome::AlreadyClaimed));
        assert!(stored_account(&store).unwrap().airdropped());
    }

    #[tokio::test]
    async fn failed_broadcast_reverts_the_mark() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(
                Document::Account(AccountDoc {
                    address: ALICE.into(),
                    first_seen_block: 12,
                    airdrop_tx_hash: None,
                }),
                None,
            )
            .await
            .unwrap();
        let broadcaster = Arc::new(Broadcaster::default());
        broadcaster.fail.store(true, Ordering::SeqCst);
        let faucet = faucet(store.clone(), broadcaster.clone());

        assert!(faucet.claim(ALICE).await.is_err());
        let account = stored_account(&store).unwrap();
        assert!(!account.airdropped());
        assert_eq!(account.first_seen_block, 12);

        broadcaster.fail.store(false, Ordering::SeqCst);
        assert!(matches!(faucet.claim(ALICE).await.unwrap(), ClaimOutcome::Sent { .. }));
    }

    #[tokio::test]
    async fn unknown_accounts_are_removed_after_a_failed_claim() {
        let store = Arc::new(MemoryStore::new());
        let broadcaster = Arc::new(Broadcaster::default());
        broadcaster.fail.store(true, Ordering::SeqCst);
        let faucet = faucet(store.clone(), broadcaster);

        assert!(faucet.claim(ALICE).await.is_err());
        assert!(stored_account(&store).is_none());
        assert!(faucet.claim("Mint").await.is_err());
    }

    #[tokio::test]
    async fn block_registering_the_address_keeps_the_airdrop_mark() {
        let store = Arc::new(MemoryStore::new());
        let broadcaster = Arc::new(Broadcaster::default());
        let faucet = faucet(store.clone(), broadcaster.clone());

        let mut cache = DocsCache::new();
        cache
            .fetch_if_empty::<AccountDoc>(store.as_ref(), &[ALICE.to_string()])
            .await
            .unwrap();
        cache
            .put(AccountDoc {
                address: ALICE.into(),
                first_seen_block: 8,
                airdrop_tx_hash: None,
            })
            .unwrap();

        let first = faucet.claim(ALICE).await.unwrap();
        assert!(matches!(first, ClaimOutcome::Sent { .. }));

        let session = store.start_session().await.unwrap();
        cache
            .flush(
                store.as_ref(),
                FlushMode::SequentialInTransaction(session),
                FlushOptions::default(),
            )
            .await
            .unwrap();
        store.commit(session).await.unwrap();

        assert!(stored_account(&store).unwrap().airdropped());
        assert_eq!(faucet.claim(ALICE).await.unwrap(), ClaimOutcome::AlreadyClaimed);
        assert_eq!(broadcaster.sent.load(Ordering::SeqCst), 1);
    }
}
