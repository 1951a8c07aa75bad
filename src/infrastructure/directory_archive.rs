// Archive units stored as JSON files named {SITE}-{TYPE}-{START}-{DURATION}.json
use crate::application::archive_repository::{
    ArchiveError, ArchiveLocator, ArchiveUnit, SampleReader,
};
use crate::domain::segments::Segment;
use crate::domain::stream::SampleStream;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct ArchiveFile {
    streams: Vec<SampleStream>,
}

/// Site, stream type and span encoded in an archive unit's file name.
pub fn parse_unit_name(path: &Path) -> Option<(String, String, Segment)> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".json")?;
    let mut parts = stem.rsplitn(3, '-');
    let duration: f64 = parts.next()?.parse().ok()?;
    let start: f64 = parts.next()?.parse().ok()?;
    let (site, stream_type) = parts.next()?.split_once('-')?;
    Some((
        site.to_string(),
        stream_type.to_string(),
        Segment::new(start, start + duration),
    ))
}

/// Finds archive units by scanning a single directory.
#[derive(Debug, Clone)]
pub struct DirectoryLocator {
    root: PathBuf,
}

impl DirectoryLocator {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl ArchiveLocator for DirectoryLocator {
    async fn locate(
        &self,
        site: &str,
        stream_type: &str,
        start: f64,
        end: f64,
    ) -> Result<Vec<ArchiveUnit>, ArchiveError> {
        let io_error = |source| ArchiveError::Io {
            path: self.root.display().to_string(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(io_error)?;

        let mut units = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let path = entry.path();
            let Some((unit_site, unit_type, span)) = parse_unit_name(&path) else {
                continue;
            };
            let unit = ArchiveUnit {
                location: path.display().to_string(),
                span,
            };
            if unit_site == site && unit_type == stream_type && unit.overlaps(start, end) {
                units.push(unit);
            }
        }

        if units.is_empty() {
            return Err(ArchiveError::NoUnits {
                site: site.to_string(),
                stream_type: stream_type.to_string(),
                start,
                end,
            });
        }
        units.sort_by(|a, b| a.span.start.total_cmp(&b.span.start));
        tracing::debug!("Found {} archive units in {}", units.len(), self.root.display());
        Ok(units)
    }
}

/// Reads channel streams out of JSON archive units on local disk.
#[derive(Debug, Clone, Default)]
pub struct JsonArchiveReader;

impl JsonArchiveReader {
    async fn load(unit: &ArchiveUnit) -> Result<HashMap<String, SampleStream>, ArchiveError> {
        let bytes = tokio::fs::read(&unit.location)
            .await
            .map_err(|source| ArchiveError::Io {
                path: unit.location.clone(),
                source,
            })?;
        let file: ArchiveFile =
            serde_json::from_slice(&bytes).map_err(|e| ArchiveError::Decode {
                path: unit.location.clone(),
                message: e.to_string(),
            })?;
        Ok(file
            .streams
            .into_iter()
            .map(|s| (s.channel.clone(), s))
            .collect())
    }
}

#[async_trait]
impl SampleReader for JsonArchiveReader {
    async fn channels(&self, unit: &ArchiveUnit) -> Result<Vec<String>, ArchiveError> {
        let mut names: Vec<String> = Self::load(unit).await?.into_keys().collect();
        names.sort();
        Ok(names)
    }

    async fn read(
        &self,
        units: &[ArchiveUnit],
        channels: &[String],
        start: f64,
        end: f64,
        parallelism: usize,
    ) -> Result<HashMap<String, SampleStream>, ArchiveError> {
        let mut relevant: Vec<&ArchiveUnit> =
            units.iter().filter(|u| u.overlaps(start, end)).collect();
        relevant.sort_by(|a, b| a.span.start.total_cmp(&b.span.start));

        let files: Vec<HashMap<String, SampleStream>> =
            futures::stream::iter(relevant.into_iter().map(Self::load))
                .buffered(parallelism.max(1))
                .try_collect()
                .await?;

        let mut data = HashMap::with_capacity(channels.len());
        for name in channels {
            let mut merged: Option<SampleStream> = None;
            for file in &files {
                let Some(stream) = file.get(name) else {
                    continue;
                };
                let piece = stream.crop(start, end);
                match merged.as_mut() {
                    None => merged = Some(piece),
                    Some(_) if piece.is_empty() => {}
                    Some(acc) if acc.is_empty() => *acc = piece,
                    Some(acc) if acc.is_contiguous_with(&piece) => acc.extend_from(piece),
                    Some(acc) => {
                        return Err(ArchiveError::Decode {
                            path: name.clone(),
                            message: format!(
                                "gap in data between {} and {}",
                                acc.end(),
                                piece.start
                            ),
                        });
                    }
                }
            }
            let stream = merged.ok_or_else(|| ArchiveError::ChannelNotFound(name.clone()))?;
            data.insert(name.clone(), stream);
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stream::DataType;

    fn write_unit(dir: &Path, start: f64, channels: &[&str]) {
        let streams: Vec<serde_json::Value> = channels
            .iter()
            .map(|name| {
                serde_json::json!({
                    "channel": name,
                    "start": start,
                    "sample_rate": 2.0,
                    "dtype": "int16",
                    "values": (0..20).map(|i| start * 2.0 + i as f64).collect::<Vec<f64>>(),
                })
            })
            .collect();
        let body = serde_json::json!({ "streams": streams });
        let path = dir.join(format!("H1-H1_R-{}-10.json", start));
        std::fs::write(path, serde_json::to_vec(&body).unwrap()).unwrap();
    }

    #[test]
    fn test_parse_unit_name() {
        let parsed = parse_unit_name(Path::new("/data/L1-L1_R-1000-64.json")).unwrap();
        assert_eq!(parsed, ("L1".to_string(), "L1_R".to_string(), Segment::new(1000.0, 1064.0)));
        assert!(parse_unit_name(Path::new("/data/readme.txt")).is_none());
        assert!(parse_unit_name(Path::new("/data/L1-L1_R-x-64.json")).is_none());
    }

    #[tokio::test]
    async fn test_locate_filters_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        write_unit(dir.path(), 110.0, &["A"]);
        write_unit(dir.path(), 100.0, &["A"]);
        write_unit(dir.path(), 200.0, &["A"]);

        let locator = DirectoryLocator::new(dir.path().to_path_buf());
        let units = locator.locate("H1", "H1_R", 105.0, 115.0).await.unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].span, Segment::new(100.0, 110.0));
        assert_eq!(units[1].span, Segment::new(110.0, 120.0));

        let err = locator.locate("L1", "L1_R", 105.0, 115.0).await.unwrap_err();
        assert!(matches!(err, ArchiveError::NoUnits { .. }));
    }

    #[tokio::test]
    async fn test_read_spans_unit_boundary() {
        let dir = tempfile::tempdir().unwrap();
        write_unit(dir.path(), 100.0, &["A", "B"]);
        write_unit(dir.path(), 110.0, &["A", "B"]);

        let locator = DirectoryLocator::new(dir.path().to_path_buf());
        let units = locator.locate("H1", "H1_R", 100.0, 120.0).await.unwrap();
        let reader = JsonArchiveReader;

        let channels = reader.channels(&units[0]).await.unwrap();
        assert_eq!(channels, vec!["A".to_string(), "B".to_string()]);

        let data = reader
            .read(&units, &["A".to_string()], 108.0, 112.0, 2)
            .await
            .unwrap();
        let a = &data["A"];
        assert_eq!(a.start, 108.0);
        assert_eq!(a.len(), 8);
        assert_eq!(a.dtype, DataType::Int16);
        assert_eq!(a.values, vec![216.0, 217.0, 218.0, 219.0, 220.0, 221.0, 222.0, 223.0]);
    }

    #[tokio::test]
    async fn test_read_missing_channel() {
        let dir = tempfile::tempdir().unwrap();
        write_unit(dir.path(), 100.0, &["A"]);
        let locator = DirectoryLocator::new(dir.path().to_path_buf());
        let units = locator.locate("H1", "H1_R", 100.0, 110.0).await.unwrap();

        let err = JsonArchiveReader
            .read(&units, &["A".to_string(), "Z".to_string()], 100.0, 110.0, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::ChannelNotFound(ref name) if name == "Z"));
    }
}
