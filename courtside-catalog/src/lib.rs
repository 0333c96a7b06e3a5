pub mod equipment;
pub mod pricing;

pub use equipment::{EquipmentError, EquipmentInventory, EquipmentItem, ItemType, RentalLine};
pub use pricing::{PriceQuote, PricingConfig, PricingEngine, PricingError, PricingRule};
