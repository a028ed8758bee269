use std::fs::File;
use std::path::Path;

use arrow2::array::{
    Array, BooleanArray, MutableBooleanArray, MutablePrimitiveArray, MutableUtf8Array,
    PrimitiveArray, Utf8Array,
};
use arrow2::chunk::Chunk;
use arrow2::datatypes::{DataType, Field, Schema};
use arrow2::io::parquet::write::{
    transverse, CompressionOptions, Encoding, FileWriter, RowGroupIterator, Version, WriteOptions,
};

use crate::cell::Cell;
use crate::table::Table;

const WRITE_OPTIONS: WriteOptions = WriteOptions {
    write_statistics: true,
    compression: CompressionOptions::Snappy,
    version: Version::V2,
    data_pagesize_limit: None,
};

/// Arrow type for a column: the narrowest type every non-null cell fits.
fn column_type<'a>(cells: impl Iterator<Item = &'a Cell>) -> DataType {
    let mut data_type: Option<DataType> = None;
    for cell in cells.filter(|c| !c.is_null()) {
        let this = match cell {
            Cell::Bool(_) => DataType::Boolean,
            Cell::Int(_) => DataType::Int64,
            Cell::Float(_) => DataType::Float64,
            _ => return DataType::Utf8,
        };
        data_type = Some(match (data_type, this) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(DataType::Int64), DataType::Float64) | (Some(DataType::Float64), DataType::Int64) => {
                DataType::Float64
            }
            _ => return DataType::Utf8,
        });
    }
    data_type.unwrap_or(DataType::Utf8)
}

fn build_array<'a>(data_type: &DataType, cells: impl Iterator<Item = &'a Cell>) -> Box<dyn Array> {
    match data_type {
        DataType::Boolean => {
            let mut col = MutableBooleanArray::new();
            for cell in cells {
                match cell {
                    Cell::Bool(b) => col.push(Some(*b)),
                    _ => col.push(None),
                }
            }
            let array: BooleanArray = col.into();
            Box::new(array)
        }
        DataType::Int64 => {
            let mut col = MutablePrimitiveArray::<i64>::new();
            for cell in cells {
                match cell {
                    Cell::Int(i) => col.push(Some(*i)),
                    _ => col.push(None),
                }
            }
            let array: PrimitiveArray<i64> = col.into();
            Box::new(array)
        }
        DataType::Float64 => {
            let mut col = MutablePrimitiveArray::<f64>::new();
            for cell in cells {
                match cell {
                    Cell::Int(i) => col.push(Some(*i as f64)),
                    Cell::Float(f) if !f.is_nan() => col.push(Some(*f)),
                    _ => col.push(None),
                }
            }
            let array: PrimitiveArray<f64> = col.into();
            Box::new(array)
        }
        _ => {
            let mut col = MutableUtf8Array::<i32>::new();
            for cell in cells {
                col.push(cell.to_text());
            }
            let array: Utf8Array<i32> = col.into();
            Box::new(array)
        }
    }
}

/// Writes `table` as a single Snappy-compressed row group.
pub fn write_parquet(table: &Table, path: &Path) -> anyhow::Result<()> {
    let mut fields = Vec::with_capacity(table.columns().len());
    let mut arrays: Vec<Box<dyn Array>> = Vec::with_capacity(table.columns().len());
    for (idx, name) in table.columns().iter().enumerate() {
        let data_type = column_type(table.rows().map(|row| &row.cells()[idx]));
        arrays.push(build_array(&data_type, table.rows().map(|row| &row.cells()[idx])));
        fields.push(Field::new(name.as_str(), data_type, true));
    }
    let schema = Schema::from(fields);
    let chunk = Chunk::try_new(arrays)?;

    let encodings = schema
        .fields
        .iter()
        .map(|f| transverse(&f.data_type, |_| Encoding::Plain))
        .collect();
    let row_groups = RowGroupIterator::try_new(vec![Ok(chunk)].into_iter(), &schema, WRITE_OPTIONS, encodings)?;

    let file = File::create(path)?;
    let mut writer = FileWriter::try_new(file, schema, WRITE_OPTIONS)?;
    for group in row_groups {
        writer.write(group?)?;
    }
    writer.end(None)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_widen_to_floats() {
        let cells = [Cell::Int(1), Cell::Null, Cell::Float(2.5)];
        assert_eq!(column_type(cells.iter()), DataType::Float64);
    }

    #[test]
    fn mixed_columns_fall_back_to_text() {
        let cells = [Cell::Int(1), Cell::from("a")];
        assert_eq!(column_type(cells.iter()), DataType::Utf8);
        assert_eq!(column_type([Cell::Null].iter()), DataType::Utf8);
    }

    #[test]
    fn arrays_keep_nulls() {
        let cells = [Cell::Bool(true), Cell::Null];
        let array = build_array(&DataType::Boolean, cells.iter());
        assert_eq!(array.len(), 2);
        assert_eq!(array.null_count(), 1);
    }
}
