mod account;
mod balance;
mod item;
mod stream;
mod txn;

pub use account::Account;
pub use balance::AccountBalance;
pub use item::Item;
pub use stream::{Direction, Frequency, RecurringRecord, RecurringStream, StreamSource};
pub use txn::Transaction;
