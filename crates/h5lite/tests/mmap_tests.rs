//! Opening files from disk, mapped and read.

mod common;

use std::io::Write;

use common::*;
use h5lite::{AccessProps, Error, File};

fn write_sample() -> tempfile::NamedTempFile {
    let mut b = FileBuilder::new();
    let grid = chunked_grid(&mut b, &[]);
    let root = b.group(&[("grid", grid)]);
    let bytes = b.finish(root);

    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(&bytes).unwrap();
    tmp.flush().unwrap();
    tmp
}

#[cfg(feature = "mmap")]
#[test]
fn opens_mapped() {
    init_tracing();
    let tmp = write_sample();
    let file = File::open(tmp.path()).unwrap();
    assert!(file.is_mmap());
    let values = file.dataset("/grid").unwrap().read_f64().unwrap();
    assert_eq!(values[7], grid_value(1, 2));
}

#[test]
fn opens_read_into_memory() {
    init_tracing();
    let tmp = write_sample();
    let file = File::open_with(tmp.path(), AccessProps::new().mmap(false)).unwrap();
    assert!(!file.is_mmap());
    let values = file.dataset("/grid").unwrap().read_f64().unwrap();
    assert_eq!(values[29], grid_value(5, 4));
}

#[test]
fn missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = File::open(dir.path().join("absent.h5")).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert_eq!(err.category(), None);
}
