//! End-to-end downsampling of a bricked project on disk

use ndarray::Array4;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::AtomicU8;
use std::time::Duration;
use volume_downsample::{
    convert::write_pyramid, staging::STAGING_PREFIX, BrickConverter, DataType, DownsampleError,
    DownsampleOptions, Downsampler, Extent3, ProjectAccess, ProjectLayout, ProjectMetadata,
    ProjectReader, ProjectRebuilder, ResolutionCatalog, ResolutionSelector, SliceExtractor,
    SliceOffset,
};

fn voxel(z: usize, y: usize, x: usize) -> u8 {
    ((x + 3 * y + 7 * z) % 251) as u8
}

/// 32³ U8 project in 8³ blocks, levels [1, 8, 64]
async fn build_source(path: &Path) -> ProjectAccess {
    let layout =
        ProjectLayout::for_volume(Extent3::cube(32), DataType::U8, 1, Extent3::cube(8)).unwrap();
    assert_eq!(layout.resolution_map, vec![1, 8, 64]);

    let project = ProjectAccess::create(path, ProjectMetadata::new("source", layout))
        .await
        .unwrap();
    let finest = Array4::from_shape_fn((32, 32, 32, 1), |(z, y, x, _)| voxel(z, y, x));
    write_pyramid(&project, 0, finest, &AtomicU8::new(0))
        .await
        .unwrap();
    project
}

fn downsampler(options: DownsampleOptions) -> Downsampler<BrickConverter> {
    let rebuilder = ProjectRebuilder::new(BrickConverter::new(Extent3::cube(8)))
        .with_poll_interval(Duration::from_millis(5));
    Downsampler::new(rebuilder, options)
}

async fn read_level(project: &ProjectAccess, level: usize) -> Vec<u8> {
    let extent = project.layout().level_extent(level).unwrap();
    project
        .get_custom_block(0, level, SliceOffset::default(), extent)
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn test_catalog_of_built_project() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let project = build_source(&temp_dir.path().join("source")).await;

    let catalog = ResolutionCatalog::from_project(&project).unwrap();
    let rows: Vec<(String, [u64; 3], String)> = catalog
        .rows()
        .into_iter()
        .map(|r| (r.option, r.resolution, r.data_size))
        .collect();
    assert_eq!(
        rows,
        vec![
            ("1".to_string(), [8, 8, 8], "512 B".to_string()),
            ("2".to_string(), [16, 16, 16], "4 KB".to_string()),
            ("Current".to_string(), [32, 32, 32], "32 KB".to_string()),
        ]
    );

    // "3" names the current level and is refused before "2" is accepted
    let selector = ResolutionSelector::new(&catalog).unwrap();
    let mut output = Vec::new();
    let level = selector
        .prompt(&mut Cursor::new("3\n2\n"), &mut output)
        .unwrap();
    assert_eq!(level.level, 1);
    assert!(String::from_utf8(output).unwrap().contains("Please try again"));
}

#[tokio::test]
async fn test_downsample_to_second_option() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let source_path = temp_dir.path().join("source");
    let project = build_source(&source_path).await;

    let catalog = ResolutionCatalog::from_project(&project).unwrap();
    let level = ResolutionSelector::new(&catalog).unwrap().select(2).unwrap();

    let extractor = SliceExtractor::new(&project, level.clone());
    assert_eq!(extractor.slab_count(), 16);
    assert_eq!(extractor.slab_shape(), Extent3::new(1, 16, 16));

    let report = downsampler(DownsampleOptions::default())
        .run(&project, &source_path, level)
        .await
        .unwrap();
    assert_eq!(report.output, temp_dir.path().join("source_Downsampled"));
    assert_eq!(report.slab_count, 16);

    let rebuilt = ProjectAccess::open(&report.output).await.unwrap();
    assert_eq!(rebuilt.name(), "source_Downsampled");
    assert_ne!(rebuilt.metadata().id, project.metadata().id);
    assert_eq!(rebuilt.layout().volume, Extent3::cube(16));
    assert_eq!(rebuilt.resolution_map(), &[1, 8]);

    let finest = rebuilt.layout().finest_level();
    assert_eq!(read_level(&rebuilt, finest).await, read_level(&project, 1).await);

    // The new coarsest level matches the source's
    assert_eq!(read_level(&rebuilt, 0).await, read_level(&project, 0).await);

    let mut entries: Vec<String> = std::fs::read_dir(temp_dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    entries.sort();
    assert_eq!(entries, vec!["source", "source_Downsampled"]);
    assert!(entries.iter().all(|e| !e.starts_with(STAGING_PREFIX)));
}

#[tokio::test]
async fn test_repeated_runs_are_identical() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let source_path = temp_dir.path().join("source");
    let project = build_source(&source_path).await;
    let catalog = ResolutionCatalog::from_project(&project).unwrap();
    let level = catalog.get(1).cloned().unwrap();

    let options = DownsampleOptions {
        overwrite: true,
        staging_dir: Some(temp_dir.path().join("temp")),
        ..Default::default()
    };

    let first = downsampler(options.clone())
        .run(&project, &source_path, level.clone())
        .await
        .unwrap();
    let first_data = read_level(&ProjectAccess::open(&first.output).await.unwrap(), 0).await;

    let second = downsampler(options)
        .run(&project, &source_path, level)
        .await
        .unwrap();
    let second_data = read_level(&ProjectAccess::open(&second.output).await.unwrap(), 0).await;

    assert_eq!(first.slab_count, second.slab_count);
    assert_eq!(first.extracted_bytes, second.extracted_bytes);
    assert_eq!(first_data, second_data);
    assert_eq!(first_data, read_level(&project, 0).await);
    assert!(!temp_dir.path().join("temp").exists());
}

#[tokio::test]
async fn test_existing_output_is_left_alone() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let source_path = temp_dir.path().join("source");
    let project = build_source(&source_path).await;
    let level = ResolutionCatalog::from_project(&project)
        .unwrap()
        .get(1)
        .cloned()
        .unwrap();

    downsampler(DownsampleOptions::default())
        .run(&project, &source_path, level.clone())
        .await
        .unwrap();
    let err = downsampler(DownsampleOptions::default())
        .run(&project, &source_path, level)
        .await
        .unwrap_err();
    assert!(matches!(err, DownsampleError::AlreadyExists(_)));
    assert!(ProjectAccess::is_project(temp_dir.path().join("source_Downsampled")).await);
}

#[tokio::test]
async fn test_single_level_project_has_no_options() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let layout =
        ProjectLayout::for_volume(Extent3::cube(8), DataType::U8, 1, Extent3::cube(8)).unwrap();
    let project = ProjectAccess::create(temp_dir.path(), ProjectMetadata::new("tiny", layout))
        .await
        .unwrap();

    let catalog = ResolutionCatalog::from_project(&project).unwrap();
    assert_eq!(catalog.resolution_count(), 1);
    assert!(matches!(
        ResolutionSelector::new(&catalog),
        Err(DownsampleError::SingleResolutionLevel)
    ));
}
