//! Staging area - the transient slice sequence between extraction and rebuild
//!
//! A staging area is owned by one downsample run. It starts empty, receives
//! one TIFF per slab under a zero-padded name, and is deleted when closed or
//! dropped, on success and failure alike.

use crate::error::{DownsampleError, Result};
use crate::extract::Slab;
use crate::types::{DataType, Extent3};
use crate::utils::SLICE_EXTENSION;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tiff::decoder::Decoder;
use tiff::encoder::TiffEncoder;
use tiff::tags::{CompressionMethod, PhotometricInterpretation, PlanarConfiguration, SampleFormat, Tag};
use tracing::{debug, warn};

/// Prefix of scoped staging directories
pub const STAGING_PREFIX: &str = ".downsample-staging-";

/// ExtraSamples value for channels beyond the photometric ones
const EXTRA_SAMPLE_UNSPECIFIED: u16 = 0;

/// Pixel layout of staged slices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabFormat {
    pub data_type: DataType,
    pub channel_count: u32,
}

impl SlabFormat {
    /// Any sample type with 1 to 65535 interleaved channels.
    pub fn new(data_type: DataType, channel_count: u32) -> Result<Self> {
        if channel_count == 0 || channel_count > u32::from(u16::MAX) {
            return Err(DownsampleError::InvalidDimensions(format!(
                "{} channels cannot be staged",
                channel_count
            )));
        }
        Ok(Self {
            data_type,
            channel_count,
        })
    }

    /// Format described by TIFF sample tags
    fn from_tags(samples: u32, bits: &[u16], formats: &[u16]) -> Result<Self> {
        let uniform = |values: &[u16], what: &str| match values {
            [first, rest @ ..] if rest.iter().all(|v| v == first) => Ok(*first),
            _ => Err(DownsampleError::InvalidFormat(format!(
                "mixed or missing {} {:?}",
                what, values
            ))),
        };
        let bits = uniform(bits, "bits per sample")?;
        let format = uniform(formats, "sample formats")?;

        let uint = SampleFormat::Uint.to_u16();
        let float = SampleFormat::IEEEFP.to_u16();
        let data_type = match (bits, format) {
            (8, f) if f == uint => DataType::U8,
            (16, f) if f == uint => DataType::U16,
            (16, f) if f == float => DataType::F16,
            (32, f) if f == uint => DataType::U32,
            (32, f) if f == float => DataType::F32,
            _ => {
                return Err(DownsampleError::InvalidFormat(format!(
                    "{}-bit samples of sample format {}",
                    bits, format
                )))
            }
        };
        Self::new(data_type, samples)
    }

    pub fn bytes_per_voxel(&self) -> usize {
        self.data_type.size_in_bytes() * self.channel_count as usize
    }

    fn sample_format(&self) -> SampleFormat {
        match self.data_type {
            DataType::F16 | DataType::F32 => SampleFormat::IEEEFP,
            DataType::U8 | DataType::U16 | DataType::U32 => SampleFormat::Uint,
        }
    }

    /// Encode raw little-endian voxels as a single-strip uncompressed TIFF.
    ///
    /// Channels are interleaved. One or two channels are written as
    /// greyscale, three or more as RGB, and the rest as extra samples.
    pub fn encode(&self, width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
        let expected = width as usize * height as usize * self.bytes_per_voxel();
        if data.len() != expected || expected == 0 {
            return Err(DownsampleError::InvalidDimensions(format!(
                "{} bytes do not form a {}x{} {} image with {} channel(s)",
                data.len(),
                width,
                height,
                self.data_type,
                self.channel_count
            )));
        }
        let strip_bytes = u32::try_from(data.len()).map_err(|_| {
            DownsampleError::InvalidDimensions(format!("{} byte slice is too large", data.len()))
        })?;

        // new() bounds the channel count to u16
        let samples = self.channel_count as u16;
        let bits = (self.data_type.size_in_bytes() * 8) as u16;
        let (photometric, colour_samples) = if samples >= 3 {
            (PhotometricInterpretation::RGB, 3)
        } else {
            (PhotometricInterpretation::BlackIsZero, 1)
        };
        let bits_per_sample = vec![bits; samples as usize];
        let sample_formats = vec![self.sample_format().to_u16(); samples as usize];
        let extra_samples = vec![EXTRA_SAMPLE_UNSPECIFIED; (samples - colour_samples) as usize];

        let mut buffer = Cursor::new(Vec::with_capacity(data.len() + 512));
        {
            let mut encoder = TiffEncoder::new(&mut buffer)?;
            let mut directory = encoder.new_directory()?;
            let offset = directory.write_data(data)?;
            let offset = u32::try_from(offset).map_err(|_| {
                DownsampleError::InvalidDimensions(format!("strip offset {} is too large", offset))
            })?;

            directory.write_tag(Tag::ImageWidth, width)?;
            directory.write_tag(Tag::ImageLength, height)?;
            directory.write_tag(Tag::BitsPerSample, &bits_per_sample[..])?;
            directory.write_tag(Tag::Compression, CompressionMethod::None.to_u16())?;
            directory.write_tag(Tag::PhotometricInterpretation, photometric.to_u16())?;
            directory.write_tag(Tag::StripOffsets, offset)?;
            directory.write_tag(Tag::SamplesPerPixel, samples)?;
            directory.write_tag(Tag::RowsPerStrip, height)?;
            directory.write_tag(Tag::StripByteCounts, strip_bytes)?;
            directory.write_tag(Tag::PlanarConfiguration, PlanarConfiguration::Chunky.to_u16())?;
            directory.write_tag(Tag::SampleFormat, &sample_formats[..])?;
            if !extra_samples.is_empty() {
                directory.write_tag(Tag::ExtraSamples, &extra_samples[..])?;
            }
            directory.finish()?;
        }
        Ok(buffer.into_inner())
    }
}

/// One decoded staging TIFF
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlabImage {
    pub width: u32,
    pub height: u32,
    pub format: SlabFormat,
    /// Interleaved little-endian voxels, row-major
    pub voxels: Vec<u8>,
}

impl SlabImage {
    /// Decode an uncompressed, chunky TIFF of any sample type.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut decoder = Decoder::new(Cursor::new(bytes))?;
        let width = decoder.get_tag_u32(Tag::ImageWidth)?;
        let height = decoder.get_tag_u32(Tag::ImageLength)?;

        let mut optional = |tag: Tag| -> Result<Option<u32>> {
            Ok(decoder.find_tag(tag)?.map(|v| v.into_u32()).transpose()?)
        };
        let samples = optional(Tag::SamplesPerPixel)?.unwrap_or(1);
        let compression = optional(Tag::Compression)?.unwrap_or(1);
        let planar = optional(Tag::PlanarConfiguration)?.unwrap_or(1);
        if compression != u32::from(CompressionMethod::None.to_u16()) {
            return Err(DownsampleError::InvalidFormat(format!(
                "compressed slice (method {})",
                compression
            )));
        }
        if planar != u32::from(PlanarConfiguration::Chunky.to_u16()) {
            return Err(DownsampleError::InvalidFormat(
                "planar slices are not supported".to_string(),
            ));
        }

        let bits = decoder.get_tag_u16_vec(Tag::BitsPerSample)?;
        let formats = match decoder.find_tag(Tag::SampleFormat)? {
            Some(value) => value.into_u16_vec()?,
            None => vec![SampleFormat::Uint.to_u16()],
        };
        let format = SlabFormat::from_tags(samples, &bits, &formats)?;

        let offsets = decoder.get_tag_u32_vec(Tag::StripOffsets)?;
        let counts = decoder.get_tag_u32_vec(Tag::StripByteCounts)?;
        if offsets.len() != counts.len() {
            return Err(DownsampleError::InvalidFormat(format!(
                "{} strip offsets but {} strip byte counts",
                offsets.len(),
                counts.len()
            )));
        }

        let expected = width as usize * height as usize * format.bytes_per_voxel();
        let mut voxels = Vec::with_capacity(expected);
        for (&offset, &count) in offsets.iter().zip(&counts) {
            let start = offset as usize;
            let strip = start
                .checked_add(count as usize)
                .and_then(|end| bytes.get(start..end))
                .ok_or_else(|| {
                    DownsampleError::InvalidFormat("strip runs past the end of the file".to_string())
                })?;
            voxels.extend_from_slice(strip);
        }
        if voxels.len() != expected {
            return Err(DownsampleError::InvalidFormat(format!(
                "{} bytes of samples, {}x{} {} x{} needs {}",
                voxels.len(),
                width,
                height,
                format.data_type,
                format.channel_count,
                expected
            )));
        }

        // Big-endian files store each sample reversed
        if bytes.starts_with(b"MM") {
            for sample in voxels.chunks_exact_mut(format.data_type.size_in_bytes()) {
                sample.reverse();
            }
        }

        Ok(Self {
            width,
            height,
            format,
            voxels,
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        Self::decode(&fs::read(path)?)
    }
}

enum StagingRoot {
    /// Private temporary directory
    Scoped(TempDir),
    /// Caller-chosen location, cleared before use
    Fixed(PathBuf),
}

/// Directory the slab sequence is written to
pub struct StagingArea {
    root: Option<StagingRoot>,
    path: PathBuf,
}

impl StagingArea {
    /// Fresh private directory inside `parent`
    pub fn scoped_in(parent: impl AsRef<Path>) -> Result<Self> {
        let parent = parent.as_ref();
        fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(parent)?;
        let path = dir.path().to_path_buf();
        debug!(path = %path.display(), "created scoped staging area");
        Ok(Self {
            root: Some(StagingRoot::Scoped(dir)),
            path,
        })
    }

    /// Use `path` for staging, deleting slices a previous run left there.
    ///
    /// An existing directory is only cleared when it holds nothing but slice
    /// files; anything else there is refused as a staging location.
    pub fn at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            if !path.is_dir() {
                return Err(DownsampleError::Configuration(format!(
                    "staging path {} is not a directory",
                    path.display()
                )));
            }
            let foreign = fs::read_dir(&path)?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<std::io::Result<Vec<_>>>()?
                .into_iter()
                .find(|entry| !is_slice_file(entry));
            if let Some(foreign) = foreign {
                return Err(DownsampleError::Configuration(format!(
                    "staging directory {} holds {}, which is not a staged slice",
                    path.display(),
                    foreign.display()
                )));
            }
            warn!(path = %path.display(), "removing leftover staging slices");
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir_all(&path)?;
        Ok(Self {
            root: Some(StagingRoot::Fixed(path.clone())),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encode a slab as TIFF under its positional name
    pub async fn write_slab(&self, slab: Slab, format: SlabFormat) -> Result<PathBuf> {
        let target = self.path.join(slab.file_name());
        let width = u32::try_from(slab.width()).map_err(|_| {
            DownsampleError::InvalidDimensions(format!("slab width {} too large", slab.width()))
        })?;
        let height = u32::try_from(slab.height()).map_err(|_| {
            DownsampleError::InvalidDimensions(format!("slab height {} too large", slab.height()))
        })?;

        let path = target.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let encoded = format.encode(width, height, &slab.data)?;
            fs::write(&path, encoded)?;
            Ok(())
        })
        .await
        .map_err(|e| DownsampleError::Image(format!("slab encoder panicked: {}", e)))??;

        Ok(target)
    }

    /// Staged slice files in stack order
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        list_slices(&self.path)
    }

    /// Delete the staging directory, reporting failure
    pub fn close(mut self) -> Result<()> {
        match self.root.take() {
            Some(StagingRoot::Scoped(dir)) => dir.close()?,
            Some(StagingRoot::Fixed(path)) => remove_if_present(&path)?,
            None => {}
        }
        debug!(path = %self.path.display(), "removed staging area");
        Ok(())
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if let Some(StagingRoot::Fixed(path)) = self.root.take() {
            if let Err(e) = remove_if_present(&path) {
                warn!(path = %path.display(), "failed to remove staging area: {}", e);
            }
        }
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn is_slice_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(SLICE_EXTENSION))
}

/// Slice files in `directory`, sorted by name
pub fn list_slices(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if is_slice_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Geometry and pixel type of a slice sequence, taken from its first file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceDescription {
    pub directory: PathBuf,

    /// Slices in stack order
    pub files: Vec<PathBuf>,

    pub width: u32,

    pub height: u32,

    pub format: SlabFormat,
}

impl SequenceDescription {
    /// Describe the sequence in `directory` using its first slice as reference.
    pub fn inspect_by_reference_file(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        if !directory.is_dir() {
            return Err(DownsampleError::EmptyStagingSequence(directory));
        }

        let files = list_slices(&directory)?;
        let Some(reference) = files.first() else {
            return Err(DownsampleError::EmptyStagingSequence(directory));
        };

        let image = SlabImage::open(reference)?;
        debug!(
            reference = %reference.display(),
            count = files.len(),
            "inspected sequence: {}x{} {} x{}",
            image.width,
            image.height,
            image.format.data_type,
            image.format.channel_count
        );

        Ok(Self {
            width: image.width,
            height: image.height,
            format: image.format,
            files,
            directory,
        })
    }

    /// Volume the stacked slices form, `(depth, height, width)`
    pub fn volume_extent(&self) -> Extent3 {
        Extent3::new(
            self.files.len() as u64,
            self.height as u64,
            self.width as u64,
        )
    }

    /// Decode one slice, checking it matches the reference file
    pub fn decode_slice(&self, path: &Path) -> Result<Vec<u8>> {
        let image = SlabImage::open(path)?;
        if image.width != self.width || image.height != self.height {
            return Err(DownsampleError::InvalidDimensions(format!(
                "{} is {}x{}, reference is {}x{}",
                path.display(),
                image.width,
                image.height,
                self.width,
                self.height
            )));
        }
        if image.format != self.format {
            return Err(DownsampleError::InvalidFormat(format!(
                "{} is {} x{}, reference is {} x{}",
                path.display(),
                image.format.data_type,
                image.format.channel_count,
                self.format.data_type,
                self.format.channel_count
            )));
        }
        Ok(image.voxels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SliceOffset;
    use bytes::Bytes;

    fn slab(position: u64, height: u64, width: u64, data: Vec<u8>) -> Slab {
        Slab {
            position,
            offset: SliceOffset::new(position, 0, 0),
            shape: Extent3::new(1, height, width),
            data: Bytes::from(data),
        }
    }

    #[test]
    fn test_every_sample_type_round_trips() {
        let cases = [
            (DataType::U8, 1),
            (DataType::U8, 2),
            (DataType::U16, 3),
            (DataType::F16, 1),
            (DataType::U32, 2),
            (DataType::F32, 1),
            (DataType::F32, 5),
        ];
        for (data_type, channels) in cases {
            let format = SlabFormat::new(data_type, channels).unwrap();
            let voxels: Vec<u8> = (0..5 * 3 * format.bytes_per_voxel())
                .map(|i| (i * 37 % 256) as u8)
                .collect();

            let encoded = format.encode(5, 3, &voxels).unwrap();
            assert!(encoded.starts_with(b"II") || encoded.starts_with(b"MM"));

            let image = SlabImage::decode(&encoded).unwrap();
            assert_eq!((image.width, image.height), (5, 3));
            assert_eq!(image.format, format, "{} x{}", data_type, channels);
            assert_eq!(image.voxels, voxels, "{} x{}", data_type, channels);
        }
    }

    #[test]
    fn test_float_samples_keep_their_bits() {
        let format = SlabFormat::new(DataType::F32, 1).unwrap();
        let values = [0.5f32, -1.25, f32::MAX, 1e-30];
        let voxels: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();

        let image = SlabImage::decode(&format.encode(2, 2, &voxels).unwrap()).unwrap();
        let decoded: Vec<f32> = image
            .voxels
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_encode_checks_length() {
        let format = SlabFormat::new(DataType::U16, 1).unwrap();
        let voxels = vec![0u8; 4 * 3 * 2];
        assert!(format.encode(4, 3, &voxels).is_ok());
        assert!(format.encode(4, 2, &voxels).is_err());
        assert!(format.encode(4, 4, &voxels).is_err());

        assert!(matches!(
            SlabFormat::new(DataType::U8, 0),
            Err(DownsampleError::InvalidDimensions(_))
        ));
        assert!(matches!(
            SlabImage::decode(b"not a tiff"),
            Err(DownsampleError::Image(_))
        ));
    }

    #[tokio::test]
    async fn test_write_and_describe_sequence() {
        let parent = TempDir::new().unwrap();
        let staging = StagingArea::scoped_in(parent.path()).unwrap();
        let format = SlabFormat::new(DataType::U8, 3).unwrap();

        for position in [2u64, 0, 1] {
            let data = vec![position as u8 * 10; 5 * 4 * 3];
            let path = staging.write_slab(slab(position, 4, 5, data), format).await.unwrap();
            assert!(path.ends_with(format!("{:08}_slice.tiff", position)));
        }

        let description = SequenceDescription::inspect_by_reference_file(staging.path()).unwrap();
        assert_eq!(description.files, staging.files().unwrap());
        assert_eq!(description.volume_extent(), Extent3::new(3, 4, 5));
        assert_eq!(description.format, format);

        for (position, file) in description.files.iter().enumerate() {
            let voxels = description.decode_slice(file).unwrap();
            assert!(voxels.iter().all(|&v| v == position as u8 * 10));
        }
    }

    #[test]
    fn test_empty_sequence_is_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            SequenceDescription::inspect_by_reference_file(dir.path()),
            Err(DownsampleError::EmptyStagingSequence(_))
        ));
        assert!(matches!(
            SequenceDescription::inspect_by_reference_file(dir.path().join("missing")),
            Err(DownsampleError::EmptyStagingSequence(_))
        ));
    }

    #[test]
    fn test_scoped_area_is_removed() {
        let parent = TempDir::new().unwrap();

        let staging = StagingArea::scoped_in(parent.path()).unwrap();
        let path = staging.path().to_path_buf();
        assert!(path.is_dir());
        staging.close().unwrap();
        assert!(!path.exists());

        let staging = StagingArea::scoped_in(parent.path()).unwrap();
        let path = staging.path().to_path_buf();
        drop(staging);
        assert!(!path.exists());
    }

    #[test]
    fn test_fixed_area_clears_leftovers() {
        let parent = TempDir::new().unwrap();
        let fixed = parent.path().join("temp");
        fs::create_dir_all(&fixed).unwrap();
        fs::write(fixed.join("00000000_slice.tiff"), b"stale").unwrap();

        let staging = StagingArea::at(&fixed).unwrap();
        assert!(staging.files().unwrap().is_empty());
        drop(staging);
        assert!(!fixed.exists());

        let staging = StagingArea::at(&fixed).unwrap();
        staging.close().unwrap();
        assert!(!fixed.exists());
    }

    #[test]
    fn test_fixed_area_refuses_foreign_content() {
        let parent = TempDir::new().unwrap();
        let fixed = parent.path().join("work");
        fs::create_dir_all(fixed.join("project")).unwrap();
        fs::write(fixed.join("project").join("project.json"), b"{}").unwrap();

        assert!(matches!(
            StagingArea::at(&fixed),
            Err(DownsampleError::Configuration(_))
        ));
        assert!(fixed.join("project").join("project.json").exists());

        let notes = parent.path().join("notes");
        fs::create_dir_all(&notes).unwrap();
        fs::write(notes.join("readme.txt"), b"keep").unwrap();
        fs::write(notes.join("00000000_slice.tiff"), b"stale").unwrap();
        assert!(StagingArea::at(&notes).is_err());
        assert!(notes.join("readme.txt").exists());

        let file = parent.path().join("file");
        fs::write(&file, b"data").unwrap();
        assert!(StagingArea::at(&file).is_err());
        assert!(file.exists());
    }
}
