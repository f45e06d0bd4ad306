//! In-memory chain, state and executor.
//!
//! These back dev mode and the test suites. The state keeps full
//! account maps per snapshot, the chain keeps every block and the
//! state reached at each root, and the executor implements a flat-cost
//! transfer model with fee accounting: enough semantics to exercise
//! every worker path without a real EVM.

use super::spec::ChainSpec;
use super::traits::{
    ChainError, ChainHeadEvent, ChainReader, ExecContext, ExecutionError, State, StateKey,
    TxExecutor, CHAIN_HEAD_CHAN_SIZE,
};
use crate::primitives::{
    Block, ConditionViolation, GasPool, Header, KnownAccount, Log, Receipt, Transaction,
    EXTRA_SEAL, EXTRA_VANITY, TX_GAS,
};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use parking_lot::{Mutex, RwLock};
use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicI64, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::mpsc;

/// Marker byte: a transaction whose input starts with it executes but
/// reverts, mirroring a failed contract call.
pub(crate) const REVERT_MARKER: u8 = 0xfd;

#[derive(Debug, Clone, Default)]
struct Account {
    balance: U256,
    nonce: u64,
    storage: HashMap<B256, B256>,
}

/// An in-memory [`State`] with clone-based snapshots and read/write
/// recording.
#[derive(Debug)]
pub struct MemoryState {
    accounts: HashMap<Address, Account>,
    journal: Vec<HashMap<Address, Account>>,
    recording: bool,
    reads: Mutex<Vec<StateKey>>,
    writes: Vec<StateKey>,
    tx_context: Option<(B256, usize)>,
    prefetcher_active: bool,
    prefetcher_gauge: Arc<AtomicI64>,
}

impl MemoryState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::with_gauge(Arc::new(AtomicI64::new(0)))
    }

    fn with_gauge(gauge: Arc<AtomicI64>) -> Self {
        Self {
            accounts: HashMap::new(),
            journal: Vec::new(),
            recording: false,
            reads: Mutex::new(Vec::new()),
            writes: Vec::new(),
            tx_context: None,
            prefetcher_active: false,
            prefetcher_gauge: gauge,
        }
    }

    /// Create a state with the given initial balances.
    pub fn with_balances(balances: &[(Address, U256)]) -> Self {
        let mut state = Self::new();
        for (address, balance) in balances {
            state.set_balance(*address, *balance);
        }
        state
    }

    fn fork(&self, gauge: Arc<AtomicI64>) -> Self {
        Self {
            accounts: self.accounts.clone(),
            journal: Vec::new(),
            recording: false,
            reads: Mutex::new(Vec::new()),
            writes: Vec::new(),
            tx_context: None,
            prefetcher_active: false,
            prefetcher_gauge: gauge,
        }
    }

    fn record_read(&self, key: StateKey) {
        if self.recording {
            let mut reads = self.reads.lock();
            if !reads.contains(&key) {
                reads.push(key);
            }
        }
    }

    fn record_write(&mut self, key: StateKey) {
        if self.recording && !self.writes.contains(&key) {
            self.writes.push(key);
        }
    }

    /// Overwrite the balance of an account.
    pub fn set_balance(&mut self, address: Address, balance: U256) {
        self.record_write(StateKey::balance(address));
        self.accounts.entry(address).or_default().balance = balance;
    }

    /// Credit an account.
    pub fn add_balance(&mut self, address: Address, amount: U256) {
        self.record_write(StateKey::balance(address));
        let account = self.accounts.entry(address).or_default();
        account.balance = account.balance.saturating_add(amount);
    }

    /// Debit an account; fails when the balance cannot cover it.
    pub fn sub_balance(&mut self, address: Address, amount: U256) -> Result<(), ExecutionError> {
        self.record_write(StateKey::balance(address));
        let account = self.accounts.entry(address).or_default();
        if account.balance < amount {
            return Err(ExecutionError::InsufficientFunds);
        }
        account.balance -= amount;
        Ok(())
    }

    /// Bump the nonce of an account.
    pub fn increment_nonce(&mut self, address: Address) {
        self.record_write(StateKey::nonce(address));
        self.accounts.entry(address).or_default().nonce += 1;
    }

    /// Read one storage slot.
    pub fn storage(&self, address: Address, slot: B256) -> B256 {
        self.record_read(StateKey::storage(address, slot));
        self.accounts
            .get(&address)
            .and_then(|a| a.storage.get(&slot).copied())
            .unwrap_or_default()
    }

    /// Write one storage slot.
    pub fn set_storage(&mut self, address: Address, slot: B256, value: B256) {
        self.record_write(StateKey::storage(address, slot));
        self.accounts.entry(address).or_default().storage.insert(slot, value);
    }

    fn account_storage_root(account: &Account) -> B256 {
        let sorted: BTreeMap<_, _> = account.storage.iter().collect();
        let mut buf = Vec::with_capacity(sorted.len() * 64);
        for (slot, value) in sorted {
            buf.extend_from_slice(slot.as_slice());
            buf.extend_from_slice(value.as_slice());
        }
        keccak256(&buf)
    }
}

impl Default for MemoryState {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryState {
    fn drop(&mut self) {
        // Dropping with a live prefetcher still releases the slot.
        if self.prefetcher_active {
            self.prefetcher_gauge.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl State for MemoryState {
    fn snapshot(&mut self) -> usize {
        self.journal.push(self.accounts.clone());
        self.journal.len() - 1
    }

    fn revert_to_snapshot(&mut self, id: usize) {
        if id < self.journal.len() {
            self.accounts = self.journal[id].clone();
            self.journal.truncate(id);
        }
    }

    fn copy(&self) -> Box<dyn State> {
        Box::new(self.fork(self.prefetcher_gauge.clone()))
    }

    fn start_prefetcher(&mut self, _name: &str) {
        if !self.prefetcher_active {
            self.prefetcher_active = true;
            self.prefetcher_gauge.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn stop_prefetcher(&mut self) {
        if self.prefetcher_active {
            self.prefetcher_active = false;
            self.prefetcher_gauge.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn set_tx_context(&mut self, tx_hash: B256, index: usize) {
        self.tx_context = Some((tx_hash, index));
    }

    fn balance(&self, address: Address) -> U256 {
        self.record_read(StateKey::balance(address));
        self.accounts.get(&address).map(|a| a.balance).unwrap_or_default()
    }

    fn nonce(&self, address: Address) -> u64 {
        self.record_read(StateKey::nonce(address));
        self.accounts.get(&address).map(|a| a.nonce).unwrap_or_default()
    }

    fn state_root(&self) -> B256 {
        let sorted: BTreeMap<_, _> = self.accounts.iter().collect();
        let mut buf = Vec::with_capacity(sorted.len() * 96);
        for (address, account) in sorted {
            buf.extend_from_slice(address.as_slice());
            buf.extend_from_slice(&account.balance.to_be_bytes::<32>());
            buf.extend_from_slice(&account.nonce.to_be_bytes());
            buf.extend_from_slice(Self::account_storage_root(account).as_slice());
        }
        keccak256(&buf)
    }

    fn validate_known_accounts(
        &self,
        accounts: &[(Address, KnownAccount)],
    ) -> Result<(), ConditionViolation> {
        for (address, expectation) in accounts {
            let account = self.accounts.get(address).cloned().unwrap_or_default();
            let ok = match expectation {
                KnownAccount::StorageRoot(root) => Self::account_storage_root(&account) == *root,
                KnownAccount::Slots(slots) => slots.iter().all(|(slot, value)| {
                    account.storage.get(slot).copied().unwrap_or_default() == *value
                }),
            };
            if !ok {
                return Err(ConditionViolation::AccountMismatch { address: *address });
            }
        }
        Ok(())
    }

    fn begin_recording(&mut self) {
        self.recording = true;
        self.reads.lock().clear();
        self.writes.clear();
    }

    fn recorded_reads(&self) -> Vec<StateKey> {
        self.reads.lock().clone()
    }

    fn recorded_writes(&self) -> Vec<StateKey> {
        self.writes.clone()
    }

    fn clear_recorded(&mut self) {
        self.reads.lock().clear();
        self.writes.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Default)]
struct ChainInner {
    blocks: HashMap<B256, Block>,
    canonical: HashMap<u64, B256>,
    head: B256,
    states: HashMap<B256, MemoryState>,
}

/// An in-memory [`ChainReader`] holding every written block and the
/// state reached at each state root.
#[derive(Debug)]
pub struct InMemoryChain {
    inner: RwLock<ChainInner>,
    head_subscribers: Mutex<Vec<mpsc::Sender<ChainHeadEvent>>>,
    prefetcher_gauge: Arc<AtomicI64>,
    peers: AtomicUsize,
}

impl InMemoryChain {
    /// Create a chain rooted at the given genesis block and state. The
    /// genesis header's state root must match the state.
    pub fn new(genesis: Block, genesis_state: MemoryState) -> Self {
        let gauge = Arc::new(AtomicI64::new(0));
        let mut inner = ChainInner {
            head: genesis.hash(),
            ..Default::default()
        };
        inner.canonical.insert(genesis.number(), genesis.hash());
        inner.states.insert(genesis.header.state_root, genesis_state.fork(gauge.clone()));
        inner.blocks.insert(genesis.hash(), genesis);

        Self {
            inner: RwLock::new(inner),
            head_subscribers: Mutex::new(Vec::new()),
            prefetcher_gauge: gauge,
            peers: AtomicUsize::new(1),
        }
    }

    /// Create a dev chain with the given funded accounts. Returns the
    /// chain together with its genesis block.
    pub fn dev(balances: &[(Address, U256)], gas_limit: u64, time: u64) -> (Self, Block) {
        let state = MemoryState::with_balances(balances);
        let header = Header {
            number: 0,
            gas_limit,
            time,
            extra: Bytes::from(vec![0u8; EXTRA_VANITY + EXTRA_SEAL]),
            state_root: state.state_root(),
            ..Default::default()
        };
        let genesis = Block::new(header, Vec::new(), None);
        let chain = Self::new(genesis.clone(), state);
        (chain, genesis)
    }

    /// Set the reported peer count.
    pub fn set_peer_count(&self, peers: usize) {
        self.peers.store(peers, Ordering::SeqCst);
    }

    /// Number of currently live prefetchers across states derived from
    /// this chain.
    pub fn active_prefetchers(&self) -> i64 {
        self.prefetcher_gauge.load(Ordering::SeqCst)
    }
}

impl ChainReader for InMemoryChain {
    fn current_header(&self) -> Header {
        let inner = self.inner.read();
        inner.blocks[&inner.head].header.clone()
    }

    fn get_block_by_hash(&self, hash: B256) -> Option<Block> {
        self.inner.read().blocks.get(&hash).cloned()
    }

    fn get_block_by_number(&self, number: u64) -> Option<Block> {
        let inner = self.inner.read();
        inner.canonical.get(&number).and_then(|h| inner.blocks.get(h)).cloned()
    }

    fn has_block(&self, hash: B256, number: u64) -> bool {
        self.inner.read().blocks.get(&hash).is_some_and(|b| b.number() == number)
    }

    fn state_at(&self, root: B256) -> Result<Box<dyn State>, ChainError> {
        let inner = self.inner.read();
        inner
            .states
            .get(&root)
            .map(|s| Box::new(s.fork(self.prefetcher_gauge.clone())) as Box<dyn State>)
            .ok_or(ChainError::MissingState(root))
    }

    fn write_block_and_set_head(
        &self,
        block: &Block,
        _receipts: &[Receipt],
        _logs: &[Log],
        state: &dyn State,
        emit_head: bool,
    ) -> Result<(), ChainError> {
        let mem = state
            .as_any()
            .downcast_ref::<MemoryState>()
            .ok_or_else(|| ChainError::Write("foreign state implementation".to_string()))?;

        {
            let mut inner = self.inner.write();
            let hash = block.hash();
            inner.states.insert(block.header.state_root, mem.fork(self.prefetcher_gauge.clone()));
            inner.canonical.insert(block.number(), hash);
            inner.blocks.insert(hash, block.clone());
            inner.head = hash;
        }

        if emit_head {
            let mut subscribers = self.head_subscribers.lock();
            subscribers
                .retain(|tx| tx.try_send(ChainHeadEvent { block: block.clone() }).is_ok());
        }
        Ok(())
    }

    fn subscribe_chain_head(&self) -> mpsc::Receiver<ChainHeadEvent> {
        let (tx, rx) = mpsc::channel(CHAIN_HEAD_CHAN_SIZE);
        self.head_subscribers.lock().push(tx);
        rx
    }

    fn peer_count(&self) -> usize {
        self.peers.load(Ordering::SeqCst)
    }
}

/// Flat-cost transfer executor over [`MemoryState`]: nonce and balance
/// checks, 21k gas per transaction, tip to the coinbase, base fee to
/// the burn contract.
#[derive(Debug, Clone, Default)]
pub struct SimpleExecutor {
    spec: ChainSpec,
}

impl SimpleExecutor {
    /// Create an executor for the given chain spec.
    pub fn new(spec: ChainSpec) -> Self {
        Self { spec }
    }
}

impl TxExecutor for SimpleExecutor {
    fn apply_transaction(
        &self,
        header: &Header,
        coinbase: Address,
        state: &mut dyn State,
        gas_pool: &mut GasPool,
        tx: &Transaction,
        cumulative_gas_used: &mut u64,
        _ctx: &ExecContext,
    ) -> Result<Receipt, ExecutionError> {
        let sender = tx
            .recover_sender()
            .map_err(|e| ExecutionError::Other(e.to_string()))?;

        let state_nonce = state.nonce(sender);
        match tx.nonce.cmp(&state_nonce) {
            std::cmp::Ordering::Less => {
                return Err(ExecutionError::NonceTooLow {
                    address: sender,
                    tx_nonce: tx.nonce,
                    state_nonce,
                })
            }
            std::cmp::Ordering::Greater => {
                return Err(ExecutionError::NonceTooHigh {
                    address: sender,
                    tx_nonce: tx.nonce,
                    state_nonce,
                })
            }
            std::cmp::Ordering::Equal => {}
        }

        let tip = tx
            .effective_gas_tip(header.base_fee)
            .map_err(|_| ExecutionError::FeeCapTooLow)?;

        gas_pool.sub_gas(TX_GAS).map_err(|_| ExecutionError::GasLimitReached)?;
        let gas_used = TX_GAS;

        let base_fee = header.base_fee.unwrap_or_default();
        let fee = U256::from(gas_used) * U256::from(base_fee + tip);
        if state.balance(sender) < tx.value.saturating_add(fee) {
            return Err(ExecutionError::InsufficientFunds);
        }

        let reverted = tx.input.first() == Some(&REVERT_MARKER);

        apply_to_memory(state, |mem| {
            mem.sub_balance(sender, fee)?;
            mem.increment_nonce(sender);
            if !reverted {
                if let Some(to) = tx.to {
                    // Touch the recipient balance before crediting it.
                    let _ = mem.balance(to);
                    mem.sub_balance(sender, tx.value)?;
                    mem.add_balance(to, tx.value);
                }
            }
            if tip > 0 {
                mem.add_balance(coinbase, U256::from(gas_used) * U256::from(tip));
            }
            if base_fee > 0 {
                if let Some(burn) = self.spec.burn_contract_at(header.number) {
                    mem.add_balance(burn, U256::from(gas_used) * U256::from(base_fee));
                }
            }
            Ok(())
        })?;

        *cumulative_gas_used += gas_used;

        let log = Log {
            address: tx.to.unwrap_or(sender),
            topics: vec![tx.hash()],
            data: Bytes::from(tx.value.to_be_bytes::<32>().to_vec()),
            block_hash: None,
        };

        Ok(Receipt {
            tx_hash: tx.hash(),
            success: !reverted,
            gas_used,
            cumulative_gas_used: *cumulative_gas_used,
            logs: if reverted { Vec::new() } else { vec![log] },
            ..Default::default()
        })
    }
}

/// Run a closure against the concrete [`MemoryState`] behind a
/// `&mut dyn State`.
fn apply_to_memory(
    state: &mut dyn State,
    f: impl FnOnce(&mut MemoryState) -> Result<(), ExecutionError>,
) -> Result<(), ExecutionError> {
    match state.as_any_mut().downcast_mut::<MemoryState>() {
        Some(mem) => f(mem),
        None => Err(ExecutionError::Other("foreign state implementation".into())),
    }
}
