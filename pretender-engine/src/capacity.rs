use pretender_model::attr::{self, Item};

use crate::error::Result;

const READ_UNIT_BYTES: usize = 4096;
const WRITE_UNIT_BYTES: usize = 1024;

/// Read capacity units consumed by returning `item`. Reads are always
/// strongly consistent, so there is no half-unit discount.
pub fn read_units(item: Option<&Item>) -> Result<f64> {
    units(item, READ_UNIT_BYTES)
}

/// Write capacity units consumed by storing `item`.
pub fn write_units(item: Option<&Item>) -> Result<f64> {
    units(item, WRITE_UNIT_BYTES)
}

fn units(item: Option<&Item>, unit_bytes: usize) -> Result<f64> {
    match item {
        None => Ok(0.0),
        Some(item) if item.is_empty() => Ok(0.0),
        Some(item) => {
            let size = attr::encoded_size(item)?;
            Ok(size.div_ceil(unit_bytes) as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretender_model::attr::AttributeValue;

    fn item_of_size(target: usize) -> Item {
        // {"p":{"S":"..."}} carries 14 bytes of framing around the payload.
        let mut item = Item::new();
        item.insert("p".into(), AttributeValue::S("x".repeat(target - 14)));
        assert_eq!(target, attr::encoded_size(&item).unwrap());
        item
    }

    #[test]
    fn empty_and_absent_items_cost_nothing() {
        assert_eq!(0.0, read_units(None).unwrap());
        assert_eq!(0.0, write_units(Some(&Item::new())).unwrap());
    }

    #[test]
    fn reads_round_up_per_4096_bytes() {
        assert_eq!(1.0, read_units(Some(&item_of_size(100))).unwrap());
        assert_eq!(1.0, read_units(Some(&item_of_size(4096))).unwrap());
        assert_eq!(2.0, read_units(Some(&item_of_size(4097))).unwrap());
    }

    #[test]
    fn writes_round_up_per_1024_bytes() {
        assert_eq!(1.0, write_units(Some(&item_of_size(1024))).unwrap());
        assert_eq!(2.0, write_units(Some(&item_of_size(1025))).unwrap());
        assert_eq!(4.0, write_units(Some(&item_of_size(4096))).unwrap());
    }
}
