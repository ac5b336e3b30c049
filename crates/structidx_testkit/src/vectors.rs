//! Golden vectors for the value codec.
//!
//! Each vector pins the exact bytes of one encoding, so an accidental
//! format change fails loudly instead of silently invalidating every index
//! on disk.

use structidx_codec::{decode_file_entries, encode_file_entries, ValueList};

/// A value list and its expected encoding.
#[derive(Debug, Clone)]
pub struct ValueListVector {
    /// Unique identifier for this vector.
    pub id: &'static str,
    /// Positions in the list.
    pub positions: Vec<u32>,
    /// Expected bytes (hex-encoded).
    pub expected_hex: &'static str,
}

/// A set of file entries and its expected encoding.
#[derive(Debug, Clone)]
pub struct FileEntriesVector {
    /// Unique identifier for this vector.
    pub id: &'static str,
    /// Entries in ascending file id order.
    pub entries: Vec<(u32, Vec<u32>)>,
    /// Expected bytes (hex-encoded).
    pub expected_hex: &'static str,
}

/// A byte string the decoder must reject.
#[derive(Debug, Clone)]
pub struct RejectVector {
    /// Unique identifier for this vector.
    pub id: &'static str,
    /// Input bytes (hex-encoded).
    pub input_hex: &'static str,
}

/// Value list vectors.
pub fn value_list_vectors() -> Vec<ValueListVector> {
    vec![
        ValueListVector {
            id: "empty",
            positions: vec![],
            expected_hex: "ffffff7f",
        },
        ValueListVector {
            id: "singleton_zero",
            positions: vec![0],
            expected_hex: "00000000",
        },
        ValueListVector {
            id: "singleton",
            positions: vec![5],
            expected_hex: "05000000",
        },
        ValueListVector {
            id: "singleton_max",
            positions: vec![0x7fff_fffe],
            expected_hex: "feffff7f",
        },
        ValueListVector {
            id: "pair",
            positions: vec![9, 4],
            expected_hex: "feffffff 09000000 04000000",
        },
        ValueListVector {
            id: "triple",
            positions: vec![1, 2, 3],
            expected_hex: "fdffffff 01000000 02000000 03000000",
        },
    ]
}

/// File entry vectors.
pub fn file_entries_vectors() -> Vec<FileEntriesVector> {
    vec![
        FileEntriesVector {
            id: "no_files",
            entries: vec![],
            expected_hex: "00000000",
        },
        FileEntriesVector {
            id: "one_file",
            entries: vec![(7, vec![5])],
            expected_hex: "01000000 07000000 05000000",
        },
        FileEntriesVector {
            id: "two_files",
            entries: vec![(1, vec![]), (300, vec![2, 8])],
            expected_hex: "02000000 01000000 ffffff7f 2c010000 feffffff 02000000 08000000",
        },
    ]
}

/// Inputs that must fail to decode as a value list.
pub fn value_list_reject_vectors() -> Vec<RejectVector> {
    vec![
        RejectVector {
            id: "truncated_head",
            input_hex: "0500",
        },
        RejectVector {
            id: "length_one",
            input_hex: "ffffffff 05000000",
        },
        RejectVector {
            id: "length_exceeds_input",
            input_hex: "fdffffff 01000000",
        },
        RejectVector {
            id: "negative_element",
            input_hex: "feffffff 01000000 ffffffff",
        },
        RejectVector {
            id: "sentinel_element",
            input_hex: "feffffff 01000000 ffffff7f",
        },
        RejectVector {
            id: "repeated_element",
            input_hex: "feffffff 05000000 05000000",
        },
    ]
}

/// Encodes bytes as hexadecimal string.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Decodes hexadecimal string to bytes. Whitespace is ignored.
pub fn hex_decode(hex: &str) -> Vec<u8> {
    let hex = hex.replace([' ', '\n', '\r'], "");
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).expect("Invalid hex"))
        .collect()
}

/// Checks every vector in both directions, panicking on the first failure.
pub fn verify_codec_vectors() {
    for vector in value_list_vectors() {
        let list = ValueList::from(vector.positions.clone());
        let expected = hex_decode(vector.expected_hex);

        let mut encoded = Vec::new();
        list.encode_into(&mut encoded).expect("encode failed");
        assert_eq!(
            hex_encode(&encoded),
            hex_encode(&expected),
            "encoding mismatch for {}",
            vector.id
        );

        let mut input = expected.as_slice();
        let decoded = ValueList::decode_from(&mut input).expect("decode failed");
        assert_eq!(decoded, list, "decoding mismatch for {}", vector.id);
        assert!(input.is_empty(), "trailing bytes for {}", vector.id);
    }

    for vector in file_entries_vectors() {
        let lists: Vec<(u32, ValueList)> = vector
            .entries
            .iter()
            .map(|(file, positions)| (*file, ValueList::from(positions.clone())))
            .collect();
        let expected = hex_decode(vector.expected_hex);

        let mut encoded = Vec::new();
        encode_file_entries(lists.iter().map(|(file, list)| (*file, list)), &mut encoded)
            .expect("encode failed");
        assert_eq!(
            hex_encode(&encoded),
            hex_encode(&expected),
            "encoding mismatch for {}",
            vector.id
        );

        let decoded: Vec<(u32, ValueList)> =
            decode_file_entries(&mut expected.as_slice()).expect("decode failed");
        assert_eq!(decoded, lists, "decoding mismatch for {}", vector.id);
    }

    for vector in value_list_reject_vectors() {
        let input = hex_decode(vector.input_hex);
        assert!(
            ValueList::decode_from(&mut input.as_slice()).is_err(),
            "{} should be rejected",
            vector.id
        );
    }
}
