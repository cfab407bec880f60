//! CSV trip source reading
//!
//! Blocking I/O; callers run these inside `spawn_blocking`.

use std::fs::File;
use std::path::Path;

use crate::error::IngestResult;
use crate::models::RawRow;

fn reader_builder() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.has_headers(true).trim(csv::Trim::All);
    builder
}

/// Sequential reader handing out rows in fixed-size chunks
pub struct CsvChunkReader {
    records: csv::DeserializeRecordsIntoIter<File, RawRow>,
}

impl CsvChunkReader {
    pub fn open(path: &Path) -> IngestResult<Self> {
        let reader = reader_builder().from_path(path)?;
        Ok(Self {
            records: reader.into_deserialize(),
        })
    }

    /// Up to `size` next rows in file order; empty at end of input
    pub fn next_chunk(&mut self, size: usize) -> IngestResult<Vec<RawRow>> {
        let mut chunk = Vec::with_capacity(size.min(4096));
        while chunk.len() < size {
            match self.records.next() {
                Some(record) => chunk.push(record?),
                None => break,
            }
        }
        Ok(chunk)
    }
}

/// Number of data rows (header excluded)
pub fn count_rows(path: &Path) -> IngestResult<u64> {
    let mut reader = reader_builder().from_path(path)?;
    let mut record = csv::ByteRecord::new();
    let mut count = 0u64;
    while reader.read_byte_record(&mut record)? {
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "region,origin_coord,destination_coord,datetime,datasource\n";

    fn csv_file(rows: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(HEADER.as_bytes()).unwrap();
        for i in 0..rows {
            writeln!(
                file,
                "Prague,POINT (14.4 50.{i}),POINT (14.5 50.1),2018-05-28 09:0{}:00,funny_car",
                i % 10
            )
            .unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_chunks_cover_file_in_order() {
        let file = csv_file(5);
        let mut reader = CsvChunkReader::open(file.path()).unwrap();

        let first = reader.next_chunk(2).unwrap();
        let second = reader.next_chunk(2).unwrap();
        let third = reader.next_chunk(2).unwrap();
        let done = reader.next_chunk(2).unwrap();

        assert_eq!((first.len(), second.len(), third.len(), done.len()), (2, 2, 1, 0));
        assert_eq!(first[0].origin_coord, "POINT (14.4 50.0)");
        assert_eq!(third[0].origin_coord, "POINT (14.4 50.4)");
        assert_eq!(first[0].datasource, "funny_car");
    }

    #[test]
    fn test_count_rows_excludes_header() {
        assert_eq!(count_rows(csv_file(0).path()).unwrap(), 0);
        assert_eq!(count_rows(csv_file(7).path()).unwrap(), 7);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(CsvChunkReader::open(Path::new("/nonexistent/trips.csv")).is_err());
        assert!(count_rows(Path::new("/nonexistent/trips.csv")).is_err());
    }
}
