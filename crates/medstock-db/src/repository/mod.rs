//! # Repository Module
//!
//! Database access for the stock ledger and everything that writes to it.
//!
//! ## Who Writes What
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  SaleRepository ─────────┐                                              │
//! │  (post, return, void)    │                                              │
//! │                          ├──► ledger::write_batch ──► movements         │
//! │  ReconciliationService ──┤    (same transaction)      stock_balance     │
//! │  (adjust, count)         │                                              │
//! │                          │                                              │
//! │  StockLedger ────────────┘                                              │
//! │  (apply, reverse, reads)                                                │
//! │                                                                         │
//! │  MedicineRepository      catalog reads (packaging, prices, costs)      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`StockLedger`] - Movement journal, balances, tier views, verification
//! - [`SaleRepository`] - Draft, post, return and void
//! - [`ReconciliationService`] - Adjustments, stock counts, balance rebuild
//! - [`MedicineRepository`] - Catalog reads
//!
//! [`StockLedger`]: ledger::StockLedger
//! [`SaleRepository`]: sale::SaleRepository
//! [`ReconciliationService`]: reconciliation::ReconciliationService
//! [`MedicineRepository`]: medicine::MedicineRepository

pub mod ledger;
pub mod medicine;
pub mod reconciliation;
pub mod sale;
