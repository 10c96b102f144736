//! `null://` — discards every packet. Grounded in
//! `original_source/src/deliverymethod.c`'s `NullOutputHandler`, the one
//! handler the manager self-registers at init, used for dry runs and by
//! tests that only need a valid sink, not real delivery.

use super::{DeliveryMethod, DeliveryMethodHandler};
use crate::error::Result;

pub const PREFIX: &str = "null://";

pub struct NullHandler;

impl DeliveryMethodHandler for NullHandler {
    fn can_handle(&self, mrl: &str) -> bool {
        mrl.starts_with(PREFIX)
    }

    fn create(&self, mrl: &str) -> Result<Box<dyn DeliveryMethod>> {
        Ok(Box::new(NullOutput { mrl: mrl.to_string() }))
    }
}

struct NullOutput {
    mrl: String,
}

impl DeliveryMethod for NullOutput {
    fn mrl(&self) -> &str {
        &self.mrl
    }

    fn send_packet(&self, _packet: &[u8; 188]) -> Result<()> {
        Ok(())
    }
}
