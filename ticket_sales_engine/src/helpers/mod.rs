use chrono::Utc;
use rand::Rng;

/// Generates a transaction id for payments created without a caller-supplied one.
pub fn new_transaction_id() -> String {
    let suffix = rand::thread_rng().gen_range(0..10_000u32);
    format!("TXN-{}-{suffix:04}", Utc::now().timestamp_millis())
}

/// Generates the gateway reference recorded on a completed refund receipt.
pub fn new_gateway_refund_id() -> String {
    format!("REF-{}", Utc::now().timestamp_millis())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transaction_id_shape() {
        let txid = new_transaction_id();
        let parts = txid.split('-').collect::<Vec<&str>>();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "TXN");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 4);
    }

    #[test]
    fn refund_id_shape() {
        assert!(new_gateway_refund_id().starts_with("REF-"));
    }
}
