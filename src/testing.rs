use std::any::type_name;
use std::fmt::Debug;
use std::io;

use codeq::Decode;
use codeq::Encode;

use crate::api::log_iterator::LogIterator;
use crate::LogRecord;

/// Asserts `v` encodes to `encoded_bytes` and decodes back from it.
#[allow(dead_code)]
pub(crate) fn test_codec<D: Encode + Decode + PartialEq + Debug>(
    encoded_bytes: &[u8],
    v: &D,
) -> Result<(), io::Error> {
    let mes = format!(
        "Type: {} encoded data: {:?}",
        type_name::<D>(),
        encoded_bytes
    );

    // Test encoding
    {
        let mut b = Vec::new();
        let n = v.encode(&mut b)?;
        assert_eq!(n, b.len(), "output len, {}", &mes);
        assert_eq!(b, encoded_bytes, "output data, {}", &mes);
    }

    // Test decoding
    {
        let decoded = D::decode(&mut &encoded_bytes[..])?;
        assert_eq!(v, &decoded, "decode, {}", &mes);
    }

    // Every truncated input fails to decode
    for i in 0..encoded_bytes.len() {
        let res = D::decode(&mut &encoded_bytes[..i]);
        assert!(res.is_err(), "decode truncated at {}, {}", i, &mes);
    }

    Ok(())
}

/// The payload the tests write for a log id.
#[allow(dead_code)]
pub(crate) fn payload(log_id: u64) -> Vec<u8> {
    format!("payload-{}", log_id).into_bytes()
}

/// A record with [`payload`] and `term = log_id / 10`.
#[allow(dead_code)]
pub(crate) fn record(log_id: u64) -> LogRecord {
    LogRecord::new(log_id, log_id / 10, 1, payload(log_id))
}

/// Drains an iterator into the records it yields.
#[allow(dead_code)]
pub(crate) fn read_all(mut it: impl LogIterator) -> Vec<LogRecord> {
    let mut got = vec![];
    while let Some(rec) = it.current() {
        got.push(rec.clone());
        it.next();
    }
    got
}

/// Create a string
#[allow(dead_code)]
pub(crate) fn ss(x: impl ToString) -> String {
    x.to_string()
}
