//! Chunked datasets: B-tree lookup, filters, fill values and the parallel
//! decode path.

mod common;

use std::sync::Arc;

use common::*;
use h5lite::{AccessProps, Error, ErrorCategory, File, Filter, FilterError, FormatError, Selection};
use proptest::prelude::*;

const LZF: u16 = 32000;

/// `/grid` plus `/packed`, a 4-element f64 dataset whose single chunk went
/// through filter 32000 (stored here unchanged).
fn sample() -> Vec<u8> {
    let mut b = FileBuilder::new();
    let grid = chunked_grid(&mut b, &[]);

    let chunk = f64_bytes(&[1.0, 2.0, 3.0, 4.0]);
    let at = b.raw(&chunk);
    let btree = b.raw(&chunk_btree_leaf(&[(chunk.len() as u32, 0, vec![0], at)], &[4]));
    let packed = b.object(&[
        (DATASPACE, dataspace(&[4])),
        (DATATYPE, f64_type()),
        (LAYOUT, chunked(btree, &[4], 8)),
        (FILTER_PIPELINE, filter_pipeline(&[(LZF, Some("lzf"), false, &[])])),
    ]);

    let root = b.group(&[("grid", grid), ("packed", packed)]);
    b.finish(root)
}

#[test]
fn deflated_grid() {
    init_tracing();
    let file = File::from_bytes(sample()).unwrap();
    let ds = file.dataset("/grid").unwrap();
    assert_eq!(ds.shape().unwrap(), vec![6, 5]);
    assert_eq!(ds.filters().unwrap().filters.len(), 1);

    let values = ds.read_f64().unwrap();
    assert_eq!(values.len(), 30);
    for r in 0..6 {
        for c in 0..5 {
            assert_eq!(values[(r * 5 + c) as usize], grid_value(r, c), "({r}, {c})");
        }
    }
}

#[test]
fn selection_matches_the_full_read() {
    init_tracing();
    let file = File::from_bytes(sample()).unwrap();
    let ds = file.dataset("/grid").unwrap();
    let full = ds.read_f64().unwrap();

    let window = ds.read_f64_selection(&Selection::slice(&[1..5, 2..5])).unwrap();
    let expected: Vec<f64> = (1..5)
        .flat_map(|r| (2..5).map(move |c| (r, c)))
        .map(|(r, c)| full[r * 5 + c])
        .collect();
    assert_eq!(window, expected);

    // inside a single chunk
    let one = ds.read_f64_selection(&Selection::slice(&[5..6, 4..5])).unwrap();
    assert_eq!(one, vec![grid_value(5, 4)]);
}

#[test]
fn parallel_matches_sequential() {
    init_tracing();
    let parallel = AccessProps::new()
        .parallel_chunks(true)
        .parallel_threshold(1)
        .chunk_batch_size(1);
    let sequential = AccessProps::new().parallel_chunks(false);

    let a = File::from_bytes_with(sample(), parallel).unwrap();
    let b = File::from_bytes_with(sample(), sequential).unwrap();
    let (a, b) = (a.dataset("/grid").unwrap(), b.dataset("/grid").unwrap());
    assert_eq!(a.read_f64().unwrap(), b.read_f64().unwrap());

    let sel = Selection::slice(&[2..6, 0..4]);
    assert_eq!(a.read_f64_selection(&sel).unwrap(), b.read_f64_selection(&sel).unwrap());
}

#[test]
fn unregistered_filter() {
    init_tracing();
    let file = File::from_bytes(sample()).unwrap();
    let err = file.dataset("/packed").unwrap().read_f64().unwrap_err();
    assert!(matches!(err, Error::Format(FormatError::FilterNotFound { id: LZF, .. })));
    assert_eq!(err.category(), Some(ErrorCategory::Capability));
    let msg = err.to_string();
    assert!(msg.contains("32000") && msg.contains("lzf"), "{msg}");

    // the rest of the file is unaffected
    assert_eq!(file.dataset("/grid").unwrap().read_f64().unwrap().len(), 30);
}

struct Passthrough;

impl Filter for Passthrough {
    fn id(&self) -> u16 {
        LZF
    }

    fn name(&self) -> &str {
        "passthrough"
    }

    fn decode(&self, input: Vec<u8>, _client_data: &[u32]) -> Result<Vec<u8>, FilterError> {
        Ok(input)
    }
}

#[test]
fn registered_filter() {
    init_tracing();
    let props = AccessProps::new().register_filter(Arc::new(Passthrough));
    let file = File::from_bytes_with(sample(), props).unwrap();
    let values = file.dataset("/packed").unwrap().read_f64().unwrap();
    assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
    // builtins are still there
    assert_eq!(file.dataset("/grid").unwrap().read_f64().unwrap().len(), 30);
}

/// 12 f64 values in chunks of 4: the first deflated, the second never
/// written, the third stored raw with the deflate bit set in its mask.
fn sparse() -> Vec<u8> {
    let mut b = FileBuilder::new();
    let first = zlib(&f64_bytes(&[0.0, 1.0, 2.0, 3.0]));
    let first_at = b.raw(&first);
    let third = f64_bytes(&[8.0, 9.0, 10.0, 11.0]);
    let third_at = b.raw(&third);
    let btree = b.raw(&chunk_btree_leaf(
        &[
            (first.len() as u32, 0, vec![0], first_at),
            (third.len() as u32, 1, vec![8], third_at),
        ],
        &[12],
    ));
    let ds = b.object(&[
        (DATASPACE, dataspace_with_max(&[12], &[u64::MAX])),
        (DATATYPE, f64_type()),
        (FILL_VALUE, fill_value(&7.5f64.to_le_bytes())),
        (LAYOUT, chunked(btree, &[4], 8)),
        (FILTER_PIPELINE, filter_pipeline(&[(1, None, false, &[6])])),
    ]);
    let root = b.group(&[("sparse", ds)]);
    b.finish(root)
}

#[test]
fn holes_and_filter_masks() {
    init_tracing();
    let file = File::from_bytes(sparse()).unwrap();
    let ds = file.dataset("/sparse").unwrap();
    assert_eq!(ds.max_shape().unwrap(), Some(vec![u64::MAX]));

    let values = ds.read_f64().unwrap();
    assert_eq!(
        values,
        vec![0.0, 1.0, 2.0, 3.0, 7.5, 7.5, 7.5, 7.5, 8.0, 9.0, 10.0, 11.0]
    );

    let window = ds.read_f64_selection(&Selection::slice(&[3..9])).unwrap();
    assert_eq!(window, vec![3.0, 7.5, 7.5, 7.5, 7.5, 8.0]);
}

proptest! {
    #[test]
    fn any_window_matches_the_grid(r0 in 0u64..6, c0 in 0u64..5, rows in 1u64..7, cols in 1u64..6) {
        let (r1, c1) = ((r0 + rows).min(6), (c0 + cols).min(5));
        let file = File::from_bytes(sample()).unwrap();
        let ds = file.dataset("/grid").unwrap();
        let window = ds.read_f64_selection(&Selection::slice(&[r0..r1, c0..c1])).unwrap();
        let expected: Vec<f64> = (r0..r1)
            .flat_map(|r| (c0..c1).map(move |c| grid_value(r, c)))
            .collect();
        prop_assert_eq!(window, expected);
    }
}
