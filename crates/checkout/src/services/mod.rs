//! External collaborators of the checkout flow and their in-memory
//! implementations.

pub mod cards;
pub mod gateway;
pub mod inventory;

pub use cards::CreditCardRegistry;
pub use gateway::{BogusGateway, PaymentGateway};
pub use inventory::{
    InMemoryInventoryAllocator, InventoryAllocator, Reservation, ReservationStatus, StockItem,
};
