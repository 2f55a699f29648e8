use std::{io::ErrorKind, path::Path};

use anyhow::Result;
use fs4::tokio::AsyncFileExt;
use serde::{de::DeserializeOwned, Serialize};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
};
use tracing::{debug, warn};

/// Appends one value as a JSON line to a day file, creating it if needed.
/// The exclusive lock keeps the CLI from reading a half-written line.
pub async fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut file = File::options()
        .append(true)
        .create(true)
        .open(path)
        .await?;

    file.lock_exclusive()?;
    let result = append_inner(&mut file, value).await;
    file.unlock_async().await?;
    result
}

async fn append_inner<T: Serialize>(file: &mut File, value: &T) -> Result<()> {
    let mut buffer = serde_json::to_vec(value)?;
    buffer.push(b'\n');
    file.write_all(&buffer).await?;
    file.flush().await?;
    Ok(())
}

/// Reads every value from a day file. A missing file is an empty day.
/// Corrupt lines are skipped; they can appear after a hard shutdown cut a
/// write short.
pub async fn read_day<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    debug!("Extracting {path:?}");
    let file = match File::open(path).await {
        Ok(v) => v,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e.into()),
    };
    file.lock_shared()?;

    let buffer = BufReader::new(file);
    let mut lines = buffer.lines();
    let mut values = vec![];
    while let Ok(Some(line)) = lines.next_line().await {
        match serde_json::from_str::<T>(&line) {
            Ok(v) => values.push(v),
            Err(e) => {
                warn!("During parsing in path {:?} found illegal json string {}: {e}", path, &line)
            }
        }
    }

    lines.into_inner().into_inner().unlock_async().await?;

    Ok(values)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use anyhow::Result;
    use serde::Deserialize;
    use tempfile::tempdir;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Item {
        name: String,
        value: u32,
    }

    #[tokio::test]
    async fn test_append_then_read() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("2018-07-04");

        append_line(&path, &Item { name: "a".into(), value: 1 }).await?;
        append_line(&path, &Item { name: "b".into(), value: 2 }).await?;

        let items: Vec<Item> = read_day(&path).await?;
        assert_eq!(
            items,
            vec![
                Item { name: "a".into(), value: 1 },
                Item { name: "b".into(), value: 2 }
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_day() -> Result<()> {
        let dir = tempdir()?;
        let items: Vec<Item> = read_day(&dir.path().join("2018-07-05")).await?;
        assert!(items.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_line_is_skipped() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("2018-07-04");

        let mut file = std::fs::File::create(&path)?;
        writeln!(file, r#"{{"name":"a","value":1}}"#)?;
        writeln!(file, r#"{{"name":"cut off"#)?;
        writeln!(file, r#"{{"name":"b","value":2}}"#)?;
        drop(file);

        let items: Vec<Item> = read_day(&path).await?;
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].value, 2);
        Ok(())
    }
}
