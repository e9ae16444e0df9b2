use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    errors::{Error, Result},
    sysfs::ValueNode,
    Pin,
};

/// Callback run on the watcher thread for each edge event.
pub type Handler = Arc<dyn Fn(&Pin) + Send + Sync>;

/// An armed interrupt: the pin, its open `value` node and its handler.
pub(crate) struct Registration {
    pub(crate) pin: Pin,
    pub(crate) node: Arc<dyn ValueNode>,
    pub(crate) handler: Handler,
    pub(crate) token: u64,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("pin", &self.pin.number())
            .field("node", &self.node)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum Slot {
    /// Reserved while export and arming run outside the table lock.
    Exporting,
    Armed(Registration),
}

/// Registrations keyed by pin number. A pin holds at most one slot.
#[derive(Debug, Default)]
pub(crate) struct RegistrationTable {
    slots: HashMap<u8, Slot>,
    generation: u64,
}

impl RegistrationTable {
    /// Claim `pin` for a registration in flight.
    pub(crate) fn reserve(&mut self, pin: u8) -> Result<()> {
        if self.slots.contains_key(&pin) {
            return Err(Error::Busy(pin));
        }
        self.slots.insert(pin, Slot::Exporting);
        Ok(())
    }

    /// Drop a reservation made by [`reserve`](Self::reserve). Armed
    /// registrations are left alone.
    pub(crate) fn cancel(&mut self, pin: u8) {
        if let Some(Slot::Exporting) = self.slots.get(&pin) {
            self.slots.remove(&pin);
        }
    }

    /// Epoll token for the next registration of `pin`. The generation in the
    /// upper bits keeps events queued for an earlier registration of the
    /// same pin from matching.
    pub(crate) fn next_token(&mut self, pin: u8) -> u64 {
        self.generation += 1;
        (self.generation << 8) | pin as u64
    }

    /// Replace the reservation for the registration's pin. Hands the
    /// registration back if the reservation is gone.
    pub(crate) fn arm(
        &mut self,
        reg: Registration,
    ) -> std::result::Result<(), Registration> {
        match self.slots.get_mut(&reg.pin.number()) {
            Some(slot @ Slot::Exporting) => {
                *slot = Slot::Armed(reg);
                Ok(())
            }
            _ => Err(reg),
        }
    }

    pub(crate) fn is_armed(&self, pin: u8) -> bool {
        matches!(self.slots.get(&pin), Some(Slot::Armed(_)))
    }

    /// Whether any registration is still between reservation and arming.
    pub(crate) fn has_reservations(&self) -> bool {
        self.slots.values().any(|slot| matches!(slot, Slot::Exporting))
    }

    #[cfg(test)]
    pub(crate) fn token(&self, pin: u8) -> Option<u64> {
        match self.slots.get(&pin)? {
            Slot::Armed(reg) => Some(reg.token),
            Slot::Exporting => None,
        }
    }

    pub(crate) fn remove(&mut self, pin: u8) -> Option<Registration> {
        match self.slots.remove(&pin)? {
            Slot::Armed(reg) => Some(reg),
            Slot::Exporting => {
                self.slots.insert(pin, Slot::Exporting);
                None
            }
        }
    }

    pub(crate) fn lookup(&self, token: u64) -> Option<&Registration> {
        let pin = (token & 0xff) as u8;
        match self.slots.get(&pin)? {
            Slot::Armed(reg) if reg.token == token => Some(reg),
            _ => None,
        }
    }

    /// Take every armed registration. Reservations stay until their
    /// registration unwinds and [`cancel`](Self::cancel)s them.
    pub(crate) fn drain(&mut self) -> Vec<Registration> {
        let pins: Vec<u8> = self
            .slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Armed(_)))
            .map(|(&pin, _)| pin)
            .collect();
        pins.into_iter().filter_map(|pin| self.remove(pin)).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reservations_are_exclusive() {
        let mut table = RegistrationTable::default();
        table.reserve(15).unwrap();
        assert!(matches!(table.reserve(15), Err(Error::Busy(15))));
        assert!(!table.is_armed(15));
        // Only armed registrations are removed; the reservation stays.
        assert!(table.remove(15).is_none());
        assert!(matches!(table.reserve(15), Err(Error::Busy(15))));

        // Draining leaves the reservation for its owner to cancel.
        assert!(table.drain().is_empty());
        assert!(table.has_reservations());

        table.cancel(15);
        assert!(!table.has_reservations());
        table.reserve(15).unwrap();
    }

    #[test]
    fn tokens_carry_pin_and_generation() {
        let mut table = RegistrationTable::default();
        let a = table.next_token(7);
        let b = table.next_token(7);
        assert_ne!(a, b);
        assert_eq!(a & 0xff, 7);
        assert_eq!(b & 0xff, 7);
        assert!(table.lookup(a).is_none());
    }
}
