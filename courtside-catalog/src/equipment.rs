use courtside_core::{ClubId, PlayerId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Racket,
    BallTube,
    Other,
}

/// Rental stock for one kind of equipment at a club.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquipmentItem {
    pub id: Uuid,
    pub club_id: ClubId,
    pub name: String,
    pub item_type: ItemType,
    pub rental_price_cents: i64,
    pub total_quantity: u32,
    #[serde(default)]
    pub available_quantity: u32,
    #[serde(default)]
    pub reserved_quantity: u32,
}

/// Equipment attached to a booking, priced at reservation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RentalLine {
    pub equipment_id: Uuid,
    pub renter: PlayerId,
    pub quantity: u32,
    pub charge_cents: i64,
}

/// In-memory rental inventory.
///
/// Stock moves `available -> reserved` while a booking is held, leaves the
/// shelf on `commit` when the booking confirms, and comes back on `return_rented`.
pub struct EquipmentInventory {
    items: HashMap<Uuid, EquipmentItem>,
}

impl EquipmentInventory {
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
        }
    }

    /// Add or replace an item; its whole stock starts available.
    pub fn stock(&mut self, mut item: EquipmentItem) {
        item.available_quantity = item.total_quantity;
        item.reserved_quantity = 0;
        self.items.insert(item.id, item);
    }

    pub fn get(&self, equipment_id: &Uuid) -> Option<&EquipmentItem> {
        self.items.get(equipment_id)
    }

    pub fn list(&self, club_id: ClubId) -> Vec<EquipmentItem> {
        let mut items: Vec<EquipmentItem> = self
            .items
            .values()
            .filter(|i| i.club_id == club_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
    }

    /// Reserve stock and return the charge for it.
    pub fn reserve(&mut self, equipment_id: &Uuid, quantity: u32) -> Result<i64, EquipmentError> {
        let item = self
            .items
            .get_mut(equipment_id)
            .ok_or(EquipmentError::NotFound(*equipment_id))?;

        if item.available_quantity < quantity {
            return Err(EquipmentError::InsufficientStock {
                equipment_id: *equipment_id,
                requested: quantity,
                available: item.available_quantity,
            });
        }

        item.available_quantity -= quantity;
        item.reserved_quantity += quantity;

        Ok(item.rental_price_cents * i64::from(quantity))
    }

    /// Reserve every request or none of them.
    pub fn reserve_all(
        &mut self,
        club_id: ClubId,
        requests: &[(Uuid, PlayerId, u32)],
    ) -> Result<Vec<RentalLine>, EquipmentError> {
        let mut lines = Vec::with_capacity(requests.len());
        for (equipment_id, renter, quantity) in requests {
            let belongs = self.items.get(equipment_id).map(|i| i.club_id == club_id);
            if belongs != Some(true) {
                self.release_all(&lines);
                return Err(EquipmentError::NotFound(*equipment_id));
            }
            match self.reserve(equipment_id, *quantity) {
                Ok(charge_cents) => lines.push(RentalLine {
                    equipment_id: *equipment_id,
                    renter: *renter,
                    quantity: *quantity,
                    charge_cents,
                }),
                Err(e) => {
                    self.release_all(&lines);
                    return Err(e);
                }
            }
        }
        Ok(lines)
    }

    /// Undo a reservation (hold expired or cancelled before confirmation).
    pub fn release(&mut self, equipment_id: &Uuid, quantity: u32) -> Result<(), EquipmentError> {
        let item = self
            .items
            .get_mut(equipment_id)
            .ok_or(EquipmentError::NotFound(*equipment_id))?;

        let released = quantity.min(item.reserved_quantity);
        item.available_quantity += released;
        item.reserved_quantity -= released;

        Ok(())
    }

    pub fn release_all(&mut self, lines: &[RentalLine]) {
        for line in lines {
            let _ = self.release(&line.equipment_id, line.quantity);
        }
    }

    /// Reserved stock is handed out with the confirmed booking.
    pub fn commit(&mut self, equipment_id: &Uuid, quantity: u32) -> Result<(), EquipmentError> {
        let item = self
            .items
            .get_mut(equipment_id)
            .ok_or(EquipmentError::NotFound(*equipment_id))?;

        if item.reserved_quantity < quantity {
            return Err(EquipmentError::InsufficientReserved {
                equipment_id: *equipment_id,
                requested: quantity,
                reserved: item.reserved_quantity,
            });
        }

        item.reserved_quantity -= quantity;

        Ok(())
    }

    pub fn commit_all(&mut self, lines: &[RentalLine]) -> Result<(), EquipmentError> {
        for line in lines {
            self.commit(&line.equipment_id, line.quantity)?;
        }
        Ok(())
    }

    /// Committed stock comes back on the shelf unless it was damaged.
    pub fn return_rented(&mut self, equipment_id: &Uuid, quantity: u32, damaged: bool) -> Result<(), EquipmentError> {
        let item = self
            .items
            .get_mut(equipment_id)
            .ok_or(EquipmentError::NotFound(*equipment_id))?;

        if damaged {
            item.total_quantity = item.total_quantity.saturating_sub(quantity);
        } else {
            item.available_quantity = (item.available_quantity + quantity).min(item.total_quantity);
        }

        Ok(())
    }

    pub fn return_all(&mut self, lines: &[RentalLine]) {
        for line in lines {
            let _ = self.return_rented(&line.equipment_id, line.quantity, false);
        }
    }
}

impl Default for EquipmentInventory {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EquipmentError {
    #[error("Equipment not found: {0}")]
    NotFound(Uuid),

    #[error("Insufficient stock for {equipment_id}: requested {requested}, available {available}")]
    InsufficientStock {
        equipment_id: Uuid,
        requested: u32,
        available: u32,
    },

    #[error("Insufficient reserved stock for {equipment_id}: requested {requested}, reserved {reserved}")]
    InsufficientReserved {
        equipment_id: Uuid,
        requested: u32,
        reserved: u32,
    },
}
