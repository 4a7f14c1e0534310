// src/builder/mod.rs
//! Fee-augmented transaction assembly.
//!
//! A compiled message is immutable, so every edit is a rebuild: resolve the
//! referenced lookup tables, decompile back to explicit instructions, patch
//! the list, recompile with the same fee payer and a current blockhash, and
//! re-sign. The input transaction is never mutated in place.

use crate::error::{EngineError, Result};
use crate::rpc::RpcManager;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::debug;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use solana_sdk::{
    address_lookup_table::{state::AddressLookupTable, AddressLookupTableAccount},
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::{AccountMeta, CompiledInstruction, Instruction},
    message::{v0, MessageHeader, VersionedMessage},
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
    system_instruction,
    transaction::VersionedTransaction,
};
use std::sync::Arc;

/// Valid tip-receiving accounts; selection is randomized to avoid
/// concentrating load on one receiver.
pub static TIP_ACCOUNTS: Lazy<Vec<Pubkey>> = Lazy::new(|| {
    [
        "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
        "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe",
        "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
        "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
    ]
    .iter()
    .map(|s| s.parse().expect("static tip account"))
    .collect()
});

pub fn pick_tip_account() -> Pubkey {
    *TIP_ACCOUNTS
        .choose(&mut rand::thread_rng())
        .expect("tip account pool is non-empty")
}

/// A signed, submittable payload plus the fee bookkeeping that produced it.
/// Once signed, the instruction list and fee payer are fixed; changing the
/// fee means building a new value from the old one.
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    pub transaction: VersionedTransaction,
    pub payer: Pubkey,
    pub priority_fee_micro_lamports: Option<u64>,
    pub compute_unit_limit: Option<u32>,
    pub tip_lamports: Option<u64>,
    pub tip_account: Option<Pubkey>,
}

enum Patch {
    PriorityFee {
        micro_lamports: u64,
        compute_limit: u32,
    },
    Tip {
        lamports: u64,
        account: Pubkey,
    },
}

pub struct TransactionBuilder {
    rpc: Arc<RpcManager>,
    payer: Arc<Keypair>,
}

impl TransactionBuilder {
    pub fn new(rpc: Arc<RpcManager>, payer: Arc<Keypair>) -> Self {
        Self { rpc, payer }
    }

    pub fn payer_pubkey(&self) -> Pubkey {
        self.payer.pubkey()
    }

    /// Returns a new transaction with compute-budget instructions prepended.
    /// Pre-existing compute-budget instructions are filtered first, so
    /// applying this twice never stacks two fee sets.
    pub async fn add_priority_fee(
        &self,
        tx: &VersionedTransaction,
        fee_micro_lamports: u64,
        compute_limit: u32,
    ) -> Result<BuiltTransaction> {
        let tables = self.resolve_tables(&tx.message).await?;
        let blockhash = self.rpc.get_latest_blockhash().await?;
        let rebuilt = self.rebuild(
            tx,
            Patch::PriorityFee {
                micro_lamports: fee_micro_lamports,
                compute_limit,
            },
            &tables,
            blockhash,
        )?;
        Ok(BuiltTransaction {
            transaction: rebuilt,
            payer: self.payer.pubkey(),
            priority_fee_micro_lamports: Some(fee_micro_lamports),
            compute_unit_limit: Some(compute_limit),
            tip_lamports: None,
            tip_account: None,
        })
    }

    /// Returns a new transaction with a tip transfer appended. When no tip
    /// account is given, one is drawn from the pool at random.
    pub async fn add_atomic_tip(
        &self,
        built: &BuiltTransaction,
        tip_lamports: u64,
        tip_account: Option<Pubkey>,
    ) -> Result<BuiltTransaction> {
        let account = tip_account.unwrap_or_else(pick_tip_account);
        let tables = self.resolve_tables(&built.transaction.message).await?;
        let blockhash = self.rpc.get_latest_blockhash().await?;
        let rebuilt = self.rebuild(
            &built.transaction,
            Patch::Tip {
                lamports: tip_lamports,
                account,
            },
            &tables,
            blockhash,
        )?;
        Ok(BuiltTransaction {
            transaction: rebuilt,
            payer: built.payer,
            priority_fee_micro_lamports: built.priority_fee_micro_lamports,
            compute_unit_limit: built.compute_unit_limit,
            tip_lamports: Some(tip_lamports),
            tip_account: Some(account),
        })
    }

    /// A minimal single-instruction tip transaction, for bundles where the
    /// tip travels as its own member rather than appended to the swap.
    pub async fn build_standalone_tip(&self, tip_lamports: u64) -> Result<BuiltTransaction> {
        let blockhash = self.rpc.get_latest_blockhash().await?;
        self.standalone_tip_with_blockhash(tip_lamports, blockhash)
    }

    fn standalone_tip_with_blockhash(
        &self,
        tip_lamports: u64,
        blockhash: Hash,
    ) -> Result<BuiltTransaction> {
        let account = pick_tip_account();
        let transfer = system_instruction::transfer(&self.payer.pubkey(), &account, tip_lamports);
        let message = v0::Message::try_compile(&self.payer.pubkey(), &[transfer], &[], blockhash)
            .map_err(|e| EngineError::Build(format!("tip message compile: {}", e)))?;
        let transaction =
            VersionedTransaction::try_new(VersionedMessage::V0(message), &[self.payer.as_ref()])
                .map_err(|e| EngineError::Build(format!("tip signing: {}", e)))?;
        Ok(BuiltTransaction {
            transaction,
            payer: self.payer.pubkey(),
            priority_fee_micro_lamports: None,
            compute_unit_limit: None,
            tip_lamports: Some(tip_lamports),
            tip_account: Some(account),
        })
    }

    /// Fetches every lookup table the message references from the active
    /// endpoint.
    async fn resolve_tables(
        &self,
        message: &VersionedMessage,
    ) -> Result<Vec<AddressLookupTableAccount>> {
        let lookups = match message {
            VersionedMessage::Legacy(_) => return Ok(vec![]),
            VersionedMessage::V0(m) => &m.address_table_lookups,
        };
        let mut tables = Vec::with_capacity(lookups.len());
        for lookup in lookups {
            let client = self.rpc.active()?;
            let data = client
                .get_account_data(&lookup.account_key)
                .await
                .map_err(|e| {
                    self.rpc.report_failure();
                    EngineError::Rpc(format!("lookup table {}: {}", lookup.account_key, e))
                })?;
            self.rpc.report_success();
            let table = AddressLookupTable::deserialize(&data).map_err(|e| {
                EngineError::Build(format!("lookup table {} decode: {}", lookup.account_key, e))
            })?;
            tables.push(AddressLookupTableAccount {
                key: lookup.account_key,
                addresses: table.addresses.to_vec(),
            });
        }
        debug!("Resolved {} lookup table(s)", tables.len());
        Ok(tables)
    }

    /// The pure rebuild: decompile, patch, recompile, re-sign. Split out from
    /// the endpoint-touching wrappers so it is directly testable.
    fn rebuild(
        &self,
        tx: &VersionedTransaction,
        patch: Patch,
        tables: &[AddressLookupTableAccount],
        blockhash: Hash,
    ) -> Result<VersionedTransaction> {
        let payer = *tx
            .message
            .static_account_keys()
            .first()
            .ok_or_else(|| EngineError::Build("transaction has no fee payer".to_string()))?;
        if payer != self.payer.pubkey() {
            return Err(EngineError::Build(format!(
                "fee payer {} does not match signing key {}",
                payer,
                self.payer.pubkey()
            )));
        }

        let decompiled = decompile(&tx.message, tables)?;
        let patched = match patch {
            Patch::PriorityFee {
                micro_lamports,
                compute_limit,
            } => {
                let mut list = vec![
                    ComputeBudgetInstruction::set_compute_unit_limit(compute_limit),
                    ComputeBudgetInstruction::set_compute_unit_price(micro_lamports),
                ];
                list.extend(
                    decompiled
                        .into_iter()
                        .filter(|ix| ix.program_id != solana_sdk::compute_budget::id()),
                );
                list
            }
            Patch::Tip { lamports, account } => {
                let mut list = decompiled;
                list.push(system_instruction::transfer(&payer, &account, lamports));
                list
            }
        };

        let message = v0::Message::try_compile(&payer, &patched, tables, blockhash)
            .map_err(|e| EngineError::Build(format!("message compile: {}", e)))?;
        VersionedTransaction::try_new(VersionedMessage::V0(message), &[self.payer.as_ref()])
            .map_err(|e| EngineError::Build(format!("signing: {}", e)))
    }
}

/// Serialization to the wire-transportable encoding. Pure transform.
pub fn serialize_base64(tx: &VersionedTransaction) -> Result<String> {
    let bytes = bincode::serialize(tx)
        .map_err(|e| EngineError::Build(format!("transaction serialize: {}", e)))?;
    Ok(BASE64.encode(bytes))
}

/// Expands a compiled message back into its explicit instruction list, using
/// the resolved lookup tables for any non-static account references.
fn decompile(
    message: &VersionedMessage,
    tables: &[AddressLookupTableAccount],
) -> Result<Vec<Instruction>> {
    let (header, static_keys, compiled, lookups): (
        &MessageHeader,
        &[Pubkey],
        &[CompiledInstruction],
        &[v0::MessageAddressTableLookup],
    ) = match message {
        VersionedMessage::Legacy(m) => (&m.header, &m.account_keys, &m.instructions, &[]),
        VersionedMessage::V0(m) => (
            &m.header,
            &m.account_keys,
            &m.instructions,
            &m.address_table_lookups,
        ),
    };

    // Runtime key order: static, then every lookup's writables, then every
    // lookup's readonlys.
    let mut keys: Vec<Pubkey> = static_keys.to_vec();
    let num_static = keys.len();
    let mut readonly_loaded = Vec::new();
    for lookup in lookups {
        let table = tables
            .iter()
            .find(|t| t.key == lookup.account_key)
            .ok_or_else(|| {
                EngineError::Build(format!("unresolved lookup table {}", lookup.account_key))
            })?;
        for &i in &lookup.writable_indexes {
            keys.push(*table.addresses.get(i as usize).ok_or_else(|| {
                EngineError::Build(format!("lookup index {} out of range", i))
            })?);
        }
        for &i in &lookup.readonly_indexes {
            readonly_loaded.push(*table.addresses.get(i as usize).ok_or_else(|| {
                EngineError::Build(format!("lookup index {} out of range", i))
            })?);
        }
    }
    let num_writable_loaded = keys.len() - num_static;
    keys.extend(readonly_loaded);

    let signed = header.num_required_signatures as usize;
    let readonly_signed = header.num_readonly_signed_accounts as usize;
    let readonly_unsigned = header.num_readonly_unsigned_accounts as usize;
    let is_writable = |idx: usize| {
        if idx < num_static {
            if idx < signed {
                idx < signed - readonly_signed
            } else {
                idx < num_static - readonly_unsigned
            }
        } else {
            idx < num_static + num_writable_loaded
        }
    };

    compiled
        .iter()
        .map(|ix| {
            let program_id = *keys.get(ix.program_id_index as usize).ok_or_else(|| {
                EngineError::Build(format!("program index {} out of range", ix.program_id_index))
            })?;
            let accounts = ix
                .accounts
                .iter()
                .map(|&ai| {
                    let idx = ai as usize;
                    let pubkey = *keys.get(idx).ok_or_else(|| {
                        EngineError::Build(format!("account index {} out of range", idx))
                    })?;
                    Ok(AccountMeta {
                        pubkey,
                        is_signer: idx < signed,
                        is_writable: is_writable(idx),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Instruction {
                program_id,
                accounts,
                data: ix.data.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn builder_and_base_tx() -> (TransactionBuilder, VersionedTransaction, Pubkey) {
        let payer = Arc::new(Keypair::new());
        let payer_pub = payer.pubkey();
        let rpc = Arc::new(RpcManager::new("http://127.0.0.1:8899", None));
        let builder = TransactionBuilder::new(rpc, payer);

        let program = Pubkey::new_unique();
        let swap_ix = Instruction {
            program_id: program,
            accounts: vec![
                AccountMeta::new(payer_pub, true),
                AccountMeta::new_readonly(Pubkey::new_unique(), false),
            ],
            data: vec![9, 9, 9],
        };
        let message =
            v0::Message::try_compile(&payer_pub, &[swap_ix], &[], Hash::default()).unwrap();
        let tx = VersionedTransaction::try_new(
            VersionedMessage::V0(message),
            &[builder.payer.as_ref()],
        )
        .unwrap();
        (builder, tx, program)
    }

    fn compute_budget_count(tx: &VersionedTransaction) -> usize {
        let keys = tx.message.static_account_keys();
        tx.message
            .instructions()
            .iter()
            .filter(|ix| keys[ix.program_id_index as usize] == solana_sdk::compute_budget::id())
            .count()
    }

    #[test]
    fn priority_fee_is_prepended_and_original_payload_survives() {
        let (builder, tx, program) = builder_and_base_tx();
        let rebuilt = builder
            .rebuild(
                &tx,
                Patch::PriorityFee {
                    micro_lamports: 25_000,
                    compute_limit: 600_000,
                },
                &[],
                Hash::default(),
            )
            .unwrap();

        // Limit + price, then the swap instruction.
        assert_eq!(rebuilt.message.instructions().len(), 3);
        assert_eq!(compute_budget_count(&rebuilt), 2);
        let keys = rebuilt.message.static_account_keys();
        let last = rebuilt.message.instructions().last().unwrap();
        assert_eq!(keys[last.program_id_index as usize], program);
        assert_eq!(last.data, vec![9, 9, 9]);
    }

    #[test]
    fn applying_priority_fee_twice_never_stacks_fee_sets() {
        let (builder, tx, _) = builder_and_base_tx();
        let once = builder
            .rebuild(
                &tx,
                Patch::PriorityFee {
                    micro_lamports: 25_000,
                    compute_limit: 600_000,
                },
                &[],
                Hash::default(),
            )
            .unwrap();
        let twice = builder
            .rebuild(
                &once,
                Patch::PriorityFee {
                    micro_lamports: 50_000,
                    compute_limit: 400_000,
                },
                &[],
                Hash::default(),
            )
            .unwrap();
        assert_eq!(compute_budget_count(&twice), 2);
        assert_eq!(twice.message.instructions().len(), 3);
    }

    #[test]
    fn tip_is_appended_after_existing_instructions() {
        let (builder, tx, _) = builder_and_base_tx();
        let account = pick_tip_account();
        let rebuilt = builder
            .rebuild(
                &tx,
                Patch::Tip {
                    lamports: 10_000,
                    account,
                },
                &[],
                Hash::default(),
            )
            .unwrap();
        assert_eq!(rebuilt.message.instructions().len(), 2);
        let keys = rebuilt.message.static_account_keys();
        let last = rebuilt.message.instructions().last().unwrap();
        assert_eq!(
            keys[last.program_id_index as usize],
            solana_sdk::system_program::id()
        );
    }

    #[test]
    fn foreign_fee_payer_is_refused() {
        let (builder, _, _) = builder_and_base_tx();
        let stranger = Keypair::new();
        let ix = system_instruction::transfer(&stranger.pubkey(), &Pubkey::new_unique(), 1);
        let message =
            v0::Message::try_compile(&stranger.pubkey(), &[ix], &[], Hash::default()).unwrap();
        let tx =
            VersionedTransaction::try_new(VersionedMessage::V0(message), &[&stranger]).unwrap();
        let err = builder
            .rebuild(
                &tx,
                Patch::PriorityFee {
                    micro_lamports: 1,
                    compute_limit: 1,
                },
                &[],
                Hash::default(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Build(_)));
    }

    #[test]
    fn standalone_tip_is_a_single_transfer() {
        let (builder, _, _) = builder_and_base_tx();
        let built = builder
            .standalone_tip_with_blockhash(42_000, Hash::default())
            .unwrap();
        assert_eq!(built.transaction.message.instructions().len(), 1);
        assert_eq!(built.tip_lamports, Some(42_000));
        assert!(TIP_ACCOUNTS.contains(&built.tip_account.unwrap()));
    }

    #[test]
    fn tip_account_pool_is_used() {
        for _ in 0..32 {
            assert!(TIP_ACCOUNTS.contains(&pick_tip_account()));
        }
    }

    #[test]
    fn serialization_round_trips_through_base64() {
        let (_, tx, _) = builder_and_base_tx();
        let encoded = serialize_base64(&tx).unwrap();
        let decoded: VersionedTransaction =
            bincode::deserialize(&BASE64.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded.message, tx.message);
    }
}
