use super::*;
use crate::cache::DocsCache;
use crate::model::balance::{balances_equal, Balance};
use crate::model::docs::{
    AccountDoc, AddressListDoc, ApprovalTrackerDoc, BalanceDoc, CollectionDoc, RefreshDoc,
    StatusDoc,
};
use crate::model::ids::{balance_doc_id, collection_doc_id, MINT_ADDRESS, TOTAL_ADDRESS};
use crate::model::uint_range::UintRange;
use crate::queue::QueuePolicy;
use crate::store::{DocKind, Document, DocumentStore, MemoryStore};
use anyhow::Result;
use serde_json::{json, Value};

const ALICE: &str = "cosmos1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu";
const BOB: &str = "cosmos1xqcrsszg2pvxq6rs0zqg3yyc5lzv7xuqypqxpq9";

fn tx(height: u64) -> TxInfo {
    TxInfo {
        height,
        timestamp: 1_700_000_000_000 + height,
        hash: format!("{height:064X}"),
        index: 0,
    }
}

fn badge_one(amount: u64) -> Vec<Balance> {
    vec![Balance::new(amount, vec![UintRange::single(1)], vec![UintRange::FULL])]
}

fn create_msg(extra: Value) -> ChainMsg {
    let mut msg = json!({
        "@type": messages::UNIVERSAL_UPDATE_COLLECTION,
        "creator": ALICE,
        "collectionId": "0",
        "balancesType": "Standard",
        "badgesToCreate": [{"amount": "100", "badgeIds": [{"start": "1", "end": "1"}], "ownershipTimes": [{"start": "1", "end": "18446744073709551615"}]}],
        "updateCollectionMetadataTimeline": true,
        "collectionMetadataTimeline": [{
            "timelineTimes": [{"start": "1", "end": "18446744073709551615"}],
            "collectionMetadata": {"uri": "ipfs://collection", "customData": ""}
        }],
        "updateManagerTimeline": true,
        "managerTimeline": [{"timelineTimes": [{"start": "1", "end": "18446744073709551615"}], "manager": ALICE}]
    });
    if let (Some(target), Value::Object(extra)) = (msg.as_object_mut(), extra) {
        target.extend(extra);
    }
    ChainMsg::decode(&msg).unwrap()
}

async fn run(store: &MemoryStore, status: StatusDoc, info: &TxInfo, msgs: Vec<ChainMsg>) -> Result<DocsCache> {
    let policy = QueuePolicy::default();
    let mut cache = DocsCache::with_status(status);
    {
        let mut ctx = HandlerContext::new(&mut cache, store, info, &policy);
        for msg in msgs {
            MessageDispatcher::new().dispatch(&mut ctx, msg).await?;
        }
    }
    Ok(cache)
}

async fn commit(store: &MemoryStore, cache: DocsCache) -> StatusDoc {
    cache
        .flush(
            store,
            crate::cache::FlushMode::ConcurrentBestEffort,
            Default::default(),
        )
        .await
        .unwrap()
        .status
        .unwrap()
}

fn stored_balance(store: &MemoryStore, collection_id: u64, address: &str) -> Option<BalanceDoc> {
    match store.get(DocKind::Balances, &balance_doc_id(collection_id, address)) {
        Some(Document::Balance(doc)) => Some(doc),
        _ => None,
    }
}

fn stored_collection(store: &MemoryStore, collection_id: u64) -> Option<CollectionDoc> {
    match store.get(DocKind::Collections, &collection_doc_id(collection_id)) {
        Some(Document::Collection(doc)) => Some(doc),
        _ => None,
    }
}

async fn seed_collection(store: &MemoryStore) -> StatusDoc {
    let cache = run(store, StatusDoc::genesis(), &tx(1), vec![create_msg(json!({}))])
        .await
        .unwrap();
    commit(store, cache).await
}

#[tokio::test]
async fn create_assigns_id_and_seeds_reservoirs() {
    let store = MemoryStore::new();
    let status = seed_collection(&store).await;

    assert_eq!(status.next_collection_id, 2);
    let collection = stored_collection(&store, 1).expect("collection stored");
    assert_eq!(collection.created_by, ALICE);
    assert_eq!(collection.manager_timeline.len(), 1);

    let mint = stored_balance(&store, 1, MINT_ADDRESS).unwrap();
    let total = stored_balance(&store, 1, TOTAL_ADDRESS).unwrap();
    assert!(balances_equal(&mint.balances, &badge_one(100)));
    assert!(balances_equal(&total.balances, &badge_one(100)));

    assert_eq!(store.count(DocKind::Accounts), 1);
    assert_eq!(store.count(DocKind::Queue), 1);
    assert!(matches!(
        store.get(DocKind::Refreshes, &collection_doc_id(1)),
        Some(Document::Refresh(RefreshDoc { collection_id: 1, .. }))
    ));
}

#[tokio::test]
async fn update_without_flags_only_appends_history() {
    let store = MemoryStore::new();
    let status = seed_collection(&store).await;
    let before = stored_collection(&store, 1).unwrap();

    let update = ChainMsg::decode(&json!({
        "@type": messages::UNIVERSAL_UPDATE_COLLECTION,
        "creator": ALICE,
        "collectionId": "1",
        "managerTimeline": [],
        "collectionMetadataTimeline": []
    }))
    .unwrap();
    let cache = run(&store, status, &tx(2), vec![update]).await.unwrap();
    commit(&store, cache).await;

    let after = stored_collection(&store, 1).unwrap();
    assert_eq!(after.update_history.len(), before.update_history.len() + 1);
    assert_eq!(after.update_history.last().unwrap().block, 2);
    let mut restored = after.clone();
    restored.update_history = before.update_history.clone();
    assert_eq!(restored, before);
    assert_eq!(store.count(DocKind::Queue), 1);
}

#[tokio::test]
async fn update_of_missing_collection_fails() {
    let store = MemoryStore::new();
    let update = ChainMsg::decode(&json!({
        "@type": messages::UNIVERSAL_UPDATE_COLLECTION,
        "creator": ALICE,
        "collectionId": "9"
    }))
    .unwrap();
    let err = run(&store, StatusDoc::genesis(), &tx(2), vec![update])
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("does not exist"));
}

#[tokio::test]
async fn transfer_moves_supply_and_records_activity() {
    let store = MemoryStore::new();
    let status = seed_collection(&store).await;
    let info = tx(3);
    let policy = QueuePolicy::default();
    let mut cache = DocsCache::with_status(status);
    {
        let mut ctx = HandlerContext::new(&mut cache, &store, &info, &policy);
        let transfer = Transfer {
            from: MINT_ADDRESS.into(),
            to_addresses: vec![ALICE.into(), BOB.into()],
            balances: badge_one(5),
        };
        apply_transfer(&mut ctx, 1, &transfer, "0").await.unwrap();
    }
    assert_eq!(cache.activity().len(), 1);
    commit(&store, cache).await;

    assert!(balances_equal(
        &stored_balance(&store, 1, MINT_ADDRESS).unwrap().balances,
        &badge_one(90)
    ));
    assert!(balances_equal(&stored_balance(&store, 1, ALICE).unwrap().balances, &badge_one(5)));
    assert!(balances_equal(&stored_balance(&store, 1, BOB).unwrap().balances, &badge_one(5)));
    assert_eq!(store.count(DocKind::TransferActivity), 1);
}

#[tokio::test]
async fn transfer_beyond_balance_is_rejected() {
    let store = MemoryStore::new();
    let status = seed_collection(&store).await;
    let info = tx(3);
    let policy = QueuePolicy::default();
    let mut cache = DocsCache::with_status(status);
    let mut ctx = HandlerContext::new(&mut cache, &store, &info, &policy);
    let transfer = Transfer {
        from: ALICE.into(),
        to_addresses: vec![BOB.into()],
        balances: badge_one(1),
    };
    assert!(apply_transfer(&mut ctx, 1, &transfer, "0").await.is_err());
}

#[tokio::test]
async fn delete_cascades_to_stored_and_pending_docs() {
    let store = MemoryStore::new();
    let status = seed_collection(&store).await;
    store
        .put(
            Document::ApprovalTracker(ApprovalTrackerDoc {
                id: "1:collection--a-t-amounts-".into(),
                collection_id: 1,
                approval_level: "collection".into(),
                approver_address: String::new(),
                approval_id: "a".into(),
                amount_tracker_id: "t".into(),
                tracker_type: "amounts".into(),
                approved_address: String::new(),
                amounts: Vec::new(),
                num_transfers: 3,
            }),
            None,
        )
        .await
        .unwrap();

    let info = tx(4);
    let policy = QueuePolicy::default();
    let mut cache = DocsCache::with_status(status);
    {
        let mut ctx = HandlerContext::new(&mut cache, &store, &info, &policy);
        let transfer = Transfer {
            from: MINT_ADDRESS.into(),
            to_addresses: vec![ALICE.into()],
            balances: badge_one(1),
        };
        apply_transfer(&mut ctx, 1, &transfer, "0").await.unwrap();
        let delete = ChainMsg::decode(&json!({
            "@type": messages::DELETE_COLLECTION,
            "creator": ALICE,
            "collectionId": "1"
        }))
        .unwrap();
        MessageDispatcher::new().dispatch(&mut ctx, delete).await.unwrap();
    }
    commit(&store, cache).await;

    assert!(stored_collection(&store, 1).is_none());
    assert_eq!(store.count(DocKind::Balances), 0);
    assert_eq!(store.count(DocKind::ApprovalTrackers), 0);
    assert!(store.get(DocKind::Refreshes, &collection_doc_id(1)).is_none());
}

#[tokio::test]
async fn user_approvals_replace_only_flagged_groups() {
    let store = MemoryStore::new();
    let status = seed_collection(&store).await;
    let msg = ChainMsg::decode(&json!({
        "@type": messages::UPDATE_USER_APPROVALS,
        "creator": BOB,
        "collectionId": "1",
        "updateOutgoingApprovals": true,
        "outgoingApprovals": [{"approvalId": "out"}],
        "incomingApprovals": [{"approvalId": "ignored"}],
        "updateAutoApproveSelfInitiatedIncomingTransfers": true,
        "autoApproveSelfInitiatedIncomingTransfers": true
    }))
    .unwrap();
    let cache = run(&store, status, &tx(5), vec![msg]).await.unwrap();
    commit(&store, cache).await;

    let doc = stored_balance(&store, 1, BOB).unwrap();
    assert_eq!(doc.outgoing_approvals, vec![json!({"approvalId": "out"})]);
    assert!(doc.incoming_approvals.is_empty());
    assert!(doc.auto_approve_self_initiated_incoming_transfers);
    assert!(!doc.auto_approve_self_initiated_outgoing_transfers);
}

#[tokio::test]
async fn address_lists_are_created_once() {
    let store = MemoryStore::new();
    let msg = |addresses: Vec<&str>| {
        ChainMsg::decode(&json!({
            "@type": messages::CREATE_ADDRESS_LISTS,
            "creator": ALICE,
            "addressLists": [
                {"listId": "friends", "addresses": addresses, "whitelist": true},
                {"listId": "All", "addresses": [], "whitelist": false}
            ]
        }))
        .unwrap()
    };
    let cache = run(&store, StatusDoc::genesis(), &tx(6), vec![msg(vec![BOB])])
        .await
        .unwrap();
    let status = commit(&store, cache).await;
    let cache = run(&store, status, &tx(7), vec![msg(vec![ALICE])]).await.unwrap();
    commit(&store, cache).await;

    assert_eq!(store.count(DocKind::AddressLists), 1);
    match store.get(DocKind::AddressLists, "friends") {
        Some(Document::AddressList(AddressListDoc { addresses, created_block, .. })) => {
            assert_eq!(addresses, vec![BOB.to_string()]);
            assert_eq!(created_block, 6);
        }
        other => panic!("unexpected list document: {other:?}"),
    }
    assert_eq!(store.count(DocKind::Accounts), 2);
}

#[tokio::test]
async fn bank_sends_register_accounts_and_unknown_types_are_ignored() {
    let store = MemoryStore::new();
    let info = tx(8);
    let policy = QueuePolicy::default();
    let mut cache = DocsCache::with_status(StatusDoc::genesis());
    {
        let mut ctx = HandlerContext::new(&mut cache, &store, &info, &policy);
        let send = ChainMsg::decode(&json!({
            "@type": messages::BANK_SEND,
            "from_address": ALICE,
            "to_address": BOB,
            "amount": [{"denom": "ubadge", "amount": "1"}]
        }))
        .unwrap();
        let dispatcher = MessageDispatcher::new();
        assert!(dispatcher.dispatch(&mut ctx, send).await.unwrap());
        assert!(!dispatcher.dispatch(&mut ctx, ChainMsg::Unrecognized).await.unwrap());
    }
    commit(&store, cache).await;

    assert!(matches!(
        store.get(DocKind::Accounts, BOB),
        Some(Document::Account(AccountDoc { first_seen_block: 8, .. }))
    ));
}
