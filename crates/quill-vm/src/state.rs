//! World state: accounts, their storage and the emitted logs.

use std::fmt;
use std::rc::Rc;

use num_bigint::BigUint;
use num_traits::Zero;
use quill_core::keccak256;
use quill_core::num::word_to_bytes;
use rustc_hash::FxHashMap;

/// A 20-byte account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The low 20 bytes of a word.
    pub fn from_word(word: &BigUint) -> Self {
        let bytes = word_to_bytes(word);
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes[12..]);
        Address(out)
    }

    /// The address as a right-aligned word.
    pub fn to_word(self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    /// Address of a contract created with `CREATE` by `sender` at `nonce`:
    /// the hash of the RLP list `[sender, nonce]`.
    pub fn create(sender: Address, nonce: u64) -> Self {
        let mut payload = Vec::with_capacity(32);
        payload.push(0x80 + 20);
        payload.extend_from_slice(&sender.0);
        match nonce {
            0 => payload.push(0x80),
            1..=0x7f => payload.push(nonce as u8),
            _ => {
                let bytes = nonce.to_be_bytes();
                let skip = bytes.iter().take_while(|b| **b == 0).count();
                payload.push(0x80 + (8 - skip) as u8);
                payload.extend_from_slice(&bytes[skip..]);
            }
        }
        let mut encoded = vec![0xc0 + payload.len() as u8];
        encoded.extend(payload);
        Self::from_hash(&encoded)
    }

    /// Address of a contract created with `CREATE2`.
    pub fn create2(sender: Address, salt: &BigUint, init_code: &[u8]) -> Self {
        let mut preimage = Vec::with_capacity(85);
        preimage.push(0xff);
        preimage.extend_from_slice(&sender.0);
        preimage.extend_from_slice(&word_to_bytes(salt));
        preimage.extend_from_slice(&keccak256(init_code));
        Self::from_hash(&preimage)
    }

    fn from_hash(data: &[u8]) -> Self {
        let hash = keccak256(data);
        let mut out = [0u8; 20];
        out.copy_from_slice(&hash[12..]);
        Address(out)
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        let mut out = [0u8; 20];
        out[12..].copy_from_slice(&value.to_be_bytes());
        Address(out)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// One account.
#[derive(Debug, Clone, Default)]
pub struct Account {
    pub code: Rc<Vec<u8>>,
    pub storage: FxHashMap<BigUint, BigUint>,
    pub balance: BigUint,
    pub nonce: u64,
}

impl Account {
    /// Whether the account is indistinguishable from a missing one.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty() && self.nonce == 0 && self.balance.is_zero()
    }
}

/// An emitted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<BigUint>,
    pub data: Vec<u8>,
}

/// Accounts plus everything a failing call has to roll back.
#[derive(Debug, Clone, Default)]
pub struct State {
    accounts: FxHashMap<Address, Account>,
    logs: Vec<Log>,
    destructed: Vec<Address>,
}

/// Restore point taken when a call frame starts.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    accounts: FxHashMap<Address, Account>,
    logs: usize,
    destructed: usize,
}

impl State {
    pub fn account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    /// The account at `address`, created empty when missing.
    pub fn account_mut(&mut self, address: Address) -> &mut Account {
        self.accounts.entry(address).or_default()
    }

    pub fn exists(&self, address: &Address) -> bool {
        self.accounts.get(address).is_some_and(|account| !account.is_empty())
    }

    pub fn code(&self, address: &Address) -> Rc<Vec<u8>> {
        self.accounts.get(address).map(|account| Rc::clone(&account.code)).unwrap_or_default()
    }

    pub fn balance(&self, address: &Address) -> BigUint {
        self.accounts.get(address).map(|account| account.balance.clone()).unwrap_or_default()
    }

    pub fn sload(&self, address: &Address, key: &BigUint) -> BigUint {
        self.accounts
            .get(address)
            .and_then(|account| account.storage.get(key))
            .cloned()
            .unwrap_or_default()
    }

    pub fn sstore(&mut self, address: Address, key: BigUint, value: BigUint) {
        let storage = &mut self.account_mut(address).storage;
        if value.is_zero() {
            storage.remove(&key);
        } else {
            storage.insert(key, value);
        }
    }

    /// Move `value` from `from` to `to`. Returns false, changing nothing,
    /// when `from` cannot cover it.
    pub fn transfer(&mut self, from: Address, to: Address, value: &BigUint) -> bool {
        if value.is_zero() {
            self.account_mut(to);
            return true;
        }
        let source = self.account_mut(from);
        if source.balance < *value {
            return false;
        }
        source.balance -= value;
        self.account_mut(to).balance += value;
        true
    }

    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    pub fn push_log(&mut self, log: Log) {
        self.logs.push(log);
    }

    pub fn mark_destructed(&mut self, address: Address) {
        if !self.destructed.contains(&address) {
            self.destructed.push(address);
        }
    }

    /// Remove the accounts destroyed during the finished transaction.
    pub fn sweep_destructed(&mut self) {
        for address in std::mem::take(&mut self.destructed) {
            self.accounts.remove(&address);
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            accounts: self.accounts.clone(),
            logs: self.logs.len(),
            destructed: self.destructed.len(),
        }
    }

    pub fn revert_to(&mut self, checkpoint: Checkpoint) {
        self.accounts = checkpoint.accounts;
        self.logs.truncate(checkpoint.logs);
        self.destructed.truncate(checkpoint.destructed);
    }
}
