use std::sync::atomic::AtomicBool;

use proof_ledger::blockchain::pow::{check_proof_of_work, mine_until};
use proof_ledger::blockchain::{Block, Chain};
use proof_ledger::config::ProtocolConfig;
use proof_ledger::error::{ChainError, SpendError};
use proof_ledger::node::Node;
use proof_ledger::transaction::{OutPoint, Transaction, TxOutput};
use proof_ledger::wallet::generate_keypair;
use secp256k1::SecretKey;

fn config() -> ProtocolConfig {
    ProtocolConfig {
        retarget_interval: 1_000,
        ..ProtocolConfig::default()
    }
}

fn pay(address: &str, amount: u64) -> Vec<TxOutput> {
    vec![TxOutput {
        address: address.to_string(),
        amount,
    }]
}

/// Coinbase to `address` and a spend of it back to `address`.
fn body(sk: &SecretKey, address: &str, ts: f64) -> Vec<Transaction> {
    let reward = Transaction::coinbase(address, 250, ts);
    let op = OutPoint {
        hash: reward.hash().to_string(),
        index: 0,
    };
    let spend = Transaction::create(pay(address, 251), ts, &[(op, sk)]);
    vec![reward, spend]
}

fn mine_at(parent: &Block, txs: Vec<Transaction>, ts: f64, difficulty: u32) -> Block {
    mine_until(parent.index() + 1, ts, parent.hash(), txs, difficulty, &AtomicBool::new(false))
        .expect("search is never cancelled")
}

fn child(chain: &Chain, parent: &Block, txs: Vec<Transaction>, ts: f64) -> Block {
    let difficulty = chain.difficulty_for(parent.hash()).expect("parent is stored");
    mine_at(parent, txs, ts, difficulty)
}

struct Fork {
    chain: Chain,
    a1: Block,
    a2: Block,
    b2: Block,
    sk_b: SecretKey,
    bob: String,
}

/// genesis -> A1 -> A2 (head), with B2 stored as a sibling of A2.
fn fork() -> Fork {
    let (sk_a, alice) = generate_keypair();
    let (sk_b, bob) = generate_keypair();
    let mut chain = Chain::new(config());
    let genesis = chain.head().clone();

    let a1 = child(&chain, &genesis, body(&sk_a, &alice, 10.0), 10.0);
    chain.add_block(a1.clone()).unwrap();
    let a2 = child(&chain, &a1, body(&sk_a, &alice, 20.0), 20.0);
    chain.add_block(a2.clone()).unwrap();
    let b2 = child(&chain, &a1, body(&sk_b, &bob, 21.0), 21.0);
    chain.add_block(b2.clone()).unwrap();
    assert_eq!(chain.head().hash(), a2.hash());

    Fork {
        chain,
        a1,
        a2,
        b2,
        sk_b,
        bob,
    }
}

#[test]
fn competing_branch_overtakes_head() {
    let Fork {
        mut chain,
        a1,
        a2,
        b2,
        sk_b,
        bob,
    } = fork();

    let b3 = child(&chain, &b2, body(&sk_b, &bob, 31.0), 31.0);
    chain.add_block(b3.clone()).unwrap();
    assert_eq!(chain.head().hash(), b3.hash());
    assert!(chain.contains(a2.hash()));

    let mut replayed = Chain::new(config());
    for block in [&a1, &b2, &b3] {
        replayed.add_block(block.clone()).unwrap();
    }
    assert_eq!(chain.utxo(), replayed.utxo());
    for tx in a2.transactions() {
        assert!(!chain.utxo().contains(tx.hash()));
    }

    let canonical: Vec<&str> = chain
        .ancestors(chain.head(), None)
        .unwrap()
        .iter()
        .map(|b| b.hash())
        .collect();
    assert_eq!(canonical, vec![b3.hash(), b2.hash(), a1.hash()]);
}

#[test]
fn failed_takeover_restores_previous_state() {
    let Fork {
        mut chain,
        a2,
        b2,
        sk_b,
        bob,
        ..
    } = fork();
    let before = chain.utxo().clone();

    let reward = Transaction::coinbase(bob.as_str(), 250, 31.0);
    let phantom = OutPoint {
        hash: "0".repeat(64),
        index: 0,
    };
    let bogus = Transaction::create(pay(&bob, 5), 31.0, &[(phantom, &sk_b)]);
    let b3 = child(&chain, &b2, vec![reward, bogus], 31.0);

    let err = chain.add_block(b3.clone()).unwrap_err();
    assert!(matches!(
        err,
        ChainError::Utxo {
            reason: SpendError::MissingReference { .. },
            ..
        }
    ));
    assert!(!err.is_fault());
    assert_eq!(chain.head().hash(), a2.hash());
    assert!(!chain.contains(b3.hash()));
    assert!(chain.contains(b2.hash()));
    assert_eq!(chain.utxo(), &before);
}

#[test]
fn invalid_side_branch_is_pruned_when_it_tries_to_take_over() {
    let (sk_a, alice) = generate_keypair();
    let (sk_b, bob) = generate_keypair();
    let mut chain = Chain::new(config());
    let genesis = chain.head().clone();

    let a1 = child(&chain, &genesis, body(&sk_a, &alice, 10.0), 10.0);
    chain.add_block(a1.clone()).unwrap();

    // spends an output that only exists on A1, so it fails once A1 is reverted
    let reward = Transaction::coinbase(bob.as_str(), 250, 11.0);
    let a1_out = OutPoint {
        hash: a1.transactions()[1].hash().to_string(),
        index: 0,
    };
    let theft = Transaction::create(pay(&bob, 300), 11.0, &[(a1_out, &sk_a)]);
    let b1 = child(&chain, &genesis, vec![reward, theft], 11.0);
    chain.add_block(b1.clone()).unwrap();
    assert!(chain.contains(b1.hash()));

    let b2 = child(&chain, &b1, body(&sk_b, &bob, 12.0), 12.0);
    let before = chain.utxo().clone();
    assert!(matches!(chain.add_block(b2.clone()), Err(ChainError::Utxo { .. })));

    assert!(!chain.contains(b1.hash()));
    assert!(!chain.contains(b2.hash()));
    assert_eq!(chain.head().hash(), a1.hash());
    assert_eq!(chain.utxo(), &before);
}

#[test]
fn pruned_branch_takes_its_other_children_along() {
    let (sk_a, alice) = generate_keypair();
    let (sk_b, bob) = generate_keypair();
    let mut chain = Chain::new(config());
    let genesis = chain.head().clone();

    let a1 = child(&chain, &genesis, body(&sk_a, &alice, 10.0), 10.0);
    chain.add_block(a1.clone()).unwrap();
    let a2 = child(&chain, &a1, body(&sk_a, &alice, 20.0), 20.0);
    chain.add_block(a2.clone()).unwrap();

    // spends an output that only exists on A1
    let reward = Transaction::coinbase(bob.as_str(), 250, 11.0);
    let a1_out = OutPoint {
        hash: a1.transactions()[1].hash().to_string(),
        index: 0,
    };
    let theft = Transaction::create(pay(&bob, 300), 11.0, &[(a1_out, &sk_a)]);
    let b1 = child(&chain, &genesis, vec![reward, theft], 11.0);
    chain.add_block(b1.clone()).unwrap();

    let b2 = child(&chain, &b1, body(&sk_b, &bob, 12.0), 12.0);
    chain.add_block(b2.clone()).unwrap();
    let b2_sibling = child(&chain, &b1, body(&sk_b, &bob, 13.0), 13.0);
    chain.add_block(b2_sibling.clone()).unwrap();
    let b3 = child(&chain, &b2, body(&sk_b, &bob, 14.0), 14.0);
    let late = child(&chain, &b2_sibling, body(&sk_b, &bob, 15.0), 15.0);

    assert!(matches!(chain.add_block(b3), Err(ChainError::Utxo { .. })));
    assert!(!chain.contains(b1.hash()));
    assert!(!chain.contains(b2.hash()));
    assert!(!chain.contains(b2_sibling.hash()));
    assert_eq!(chain.len(), 3);
    assert_eq!(chain.head().hash(), a2.hash());

    for block in [&a2, &a1] {
        assert!(chain.ancestors(block, None).is_ok());
    }
    let err = chain.add_block(late).unwrap_err();
    assert!(matches!(err, ChainError::NoParent(_)));
    assert!(!err.is_fault());
}

#[test]
fn same_block_double_spend_is_rejected() {
    let (sk, alice) = generate_keypair();
    let mut chain = Chain::new(config());
    let genesis = chain.head().clone();

    let mut txs = body(&sk, &alice, 10.0);
    let op = OutPoint {
        hash: txs[0].hash().to_string(),
        index: 0,
    };
    txs.push(Transaction::create(pay("someone", 260), 10.5, &[(op, &sk)]));
    let block = child(&chain, &genesis, txs, 10.0);

    assert!(matches!(chain.add_block(block.clone()), Err(ChainError::Invalid(_))));
    assert!(!chain.contains(block.hash()));
}

#[test]
fn retarget_tracks_block_timing() {
    let cfg = ProtocolConfig {
        retarget_interval: 4,
        ..ProtocolConfig::default()
    };

    // no time between blocks
    let mut fast = Chain::new(cfg.clone());
    let mut parent = fast.head().clone();
    for _ in 1..4 {
        let (sk, address) = generate_keypair();
        let block = child(&fast, &parent, body(&sk, &address, 500.0), 500.0);
        fast.add_block(block.clone()).unwrap();
        parent = block;
    }
    let implied = check_proof_of_work(parent.hash(), cfg.min_difficulty);
    let raised = fast.next_difficulty().unwrap();
    assert!(raised > implied);

    let (sk, address) = generate_keypair();
    let boundary = child(&fast, &parent, body(&sk, &address, 500.0), 500.0);
    fast.add_block(boundary.clone()).unwrap();
    assert_eq!(fast.head().index(), 4);

    // two target intervals between blocks; the last one carries extra work
    let (sk, address) = generate_keypair();
    let mut slow = Chain::new(cfg.clone());
    let mut parent = slow.head().clone();
    for i in 1..4u32 {
        let ts = 1_000.0 + 120.0 * f64::from(i);
        let required = slow.difficulty_for(parent.hash()).unwrap();
        let difficulty = if i == 3 { required.max(3) } else { required };
        let block = mine_at(&parent, body(&sk, &address, ts), ts, difficulty);
        slow.add_block(block.clone()).unwrap();
        parent = block;
    }
    let implied = check_proof_of_work(parent.hash(), cfg.min_difficulty);
    assert!(slow.next_difficulty().unwrap() < implied);
}

#[test]
fn node_relays_blocks_between_peers() {
    let origin = Node::new(config());
    let peer = Node::new(config());
    let (sk, address) = generate_keypair();

    let first = origin.mine_next(&sk).unwrap().unwrap();
    let second = origin.mine_next(&sk).unwrap().unwrap();

    let early = peer.submit_block(&second.to_json().unwrap());
    assert!(!early.accepted);
    assert_eq!(peer.head_index(), 0);

    assert!(peer.submit_block(&first.to_json().unwrap()).accepted);
    assert!(peer.submit_block(&second.to_json().unwrap()).accepted);
    assert_eq!(peer.head_hash(), origin.head_hash());
    assert_eq!(peer.balance(&address), origin.balance(&address));

    let fetched = peer.block_by_hash(second.hash()).unwrap();
    assert_eq!(fetched, second);
    let tx = &second.transactions()[1];
    assert_eq!(peer.transaction_by_hash(tx.hash()).as_ref(), Some(tx));
}
