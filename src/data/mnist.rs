use anyhow::{Context, Result, bail, ensure};
use burn_dataset::network::downloader::download_file_as_bytes;
use burn_dataset::{
    Dataset, InMemDataset,
    transform::{Mapper, MapperDataset},
};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

// CVDF mirror of http://yann.lecun.com/exdb/mnist/
const URL: &str = "https://storage.googleapis.com/cvdf-datasets/mnist/";
const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;

pub const WIDTH: usize = 28;
pub const HEIGHT: usize = 28;
pub const NUM_CLASSES: usize = 10;

/// Dataset root used when none is given on the command line.
pub const DEFAULT_DATA_DIR: &str = "../data";

/// MNIST item.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MnistItem {
    /// Image as a flat array of floats.
    /// Each value is a brightness, in between 0.0 and 255.0.
    ///
    /// # Shape
    /// [HEIGHT * WIDTH]
    pub image: Vec<f32>,

    /// Label of the image.
    /// Each value is in between 0 and 9.
    pub label: u8,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MnistItemRaw {
    pub image_bytes: Vec<u8>,
    pub label: u8,
}

struct BytesToImage;

impl Mapper<MnistItemRaw, MnistItem> for BytesToImage {
    fn map(&self, item: &MnistItemRaw) -> MnistItem {
        debug_assert_eq!(item.image_bytes.len(), WIDTH * HEIGHT);
        let image = item.image_bytes.iter().map(|&b| f32::from(b)).collect();
        MnistItem {
            image,
            label: item.label,
        }
    }
}

type MappedDataset = MapperDataset<InMemDataset<MnistItemRaw>, BytesToImage, MnistItemRaw>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Split {
    Train,
    Test,
}

impl Split {
    fn files(self) -> (&'static str, &'static str) {
        match self {
            Split::Train => (TRAIN_IMAGES, TRAIN_LABELS),
            Split::Test => (TEST_IMAGES, TEST_LABELS),
        }
    }
}

/// The MNIST dataset: 28x28 grayscale digits in 10 classes, split into
/// 60,000 training images and 10,000 test images.
///
/// Files are read from `<root>/MNIST/raw` and downloaded from the
/// [CVDF mirror](https://github.com/cvdfoundation/mnist) when missing.
pub struct MnistDataset {
    dataset: MappedDataset,
}

impl Dataset<MnistItem> for MnistDataset {
    fn get(&self, index: usize) -> Option<MnistItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl MnistDataset {
    /// Loads the training split, downloading it first if needed.
    pub fn train(root: impl AsRef<Path>) -> Result<Self> {
        Self::new(root.as_ref(), Split::Train)
    }

    /// Loads the test split, downloading it first if needed.
    pub fn test(root: impl AsRef<Path>) -> Result<Self> {
        Self::new(root.as_ref(), Split::Test)
    }

    fn new(root: &Path, split: Split) -> Result<Self> {
        let raw_dir = Self::download(root, split)?;
        let (images_name, labels_name) = split.files();

        // MNIST is tiny so we can load it in-memory
        let images = std::fs::read(raw_dir.join(images_name))
            .with_context(|| format!("failed to read {images_name} in {raw_dir:?}"))?;
        let labels = std::fs::read(raw_dir.join(labels_name))
            .with_context(|| format!("failed to read {labels_name} in {raw_dir:?}"))?;

        let dataset = Self::from_idx(&images, &labels)
            .with_context(|| format!("invalid {split:?} split in {raw_dir:?}"))?;
        log::info!("loaded {} {split:?} images", dataset.len());
        Ok(dataset)
    }

    /// Builds a dataset from the (decompressed) contents of an images file and a labels file.
    pub fn from_idx(images: &[u8], labels: &[u8]) -> Result<Self> {
        let images = parse_images(images)?;
        let labels = parse_labels(labels)?;
        ensure!(
            images.len() == labels.len(),
            "got {} images but {} labels",
            images.len(),
            labels.len()
        );

        let items: Vec<_> = images
            .into_iter()
            .zip(labels)
            .map(|(image_bytes, label)| MnistItemRaw { image_bytes, label })
            .collect();
        let dataset = MapperDataset::new(InMemDataset::new(items), BytesToImage);
        Ok(Self { dataset })
    }

    /// Makes sure both files of a split exist under `<root>/MNIST/raw`.
    fn download(root: &Path, split: Split) -> Result<PathBuf> {
        let raw_dir = root.join("MNIST").join("raw");
        create_dir_all(&raw_dir).with_context(|| format!("failed to create {raw_dir:?}"))?;

        let (images_name, labels_name) = split.files();
        Self::download_file(images_name, &raw_dir)?;
        Self::download_file(labels_name, &raw_dir)?;
        Ok(raw_dir)
    }

    fn download_file(name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let file_name = dest_dir.join(name);
        if file_name.exists() {
            return Ok(file_name);
        }

        log::info!("downloading {name} into {dest_dir:?}");
        let bytes = download_file_as_bytes(&format!("{URL}{name}.gz"), name);
        gunzip_into(&bytes, &file_name)?;
        Ok(file_name)
    }
}

/// Decompresses `gz_bytes` into `file_name`.
///
/// The content goes to a `.part` sibling first, so `file_name` only ever
/// exists once fully written.
fn gunzip_into(gz_bytes: &[u8], file_name: &Path) -> Result<()> {
    let part_name = file_name.with_extension("part");
    let written = File::create(&part_name)
        .with_context(|| format!("failed to create {part_name:?}"))
        .and_then(|mut output_file| {
            let mut gz_buffer = GzDecoder::new(gz_bytes);
            std::io::copy(&mut gz_buffer, &mut output_file)
                .with_context(|| format!("failed to decompress into {part_name:?}"))
        });
    if let Err(err) = written {
        std::fs::remove_file(&part_name).ok();
        return Err(err);
    }
    std::fs::rename(&part_name, file_name)
        .with_context(|| format!("failed to move {part_name:?} to {file_name:?}"))
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    let Some(word) = bytes.get(offset..offset + 4) else {
        bail!("header truncated at byte {offset}");
    };
    Ok(u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
}

/// Parses an IDX3 images file into one `HEIGHT * WIDTH` byte vector per image.
pub fn parse_images(bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    let magic = read_u32(bytes, 0)?;
    ensure!(magic == IMAGES_MAGIC, "bad images magic {magic:#010x}");
    let count = read_u32(bytes, 4)? as usize;
    let rows = read_u32(bytes, 8)? as usize;
    let cols = read_u32(bytes, 12)? as usize;
    ensure!(
        rows == HEIGHT && cols == WIDTH,
        "expected {HEIGHT}x{WIDTH} images, got {rows}x{cols}"
    );

    let body = &bytes[16..];
    let expected = count * HEIGHT * WIDTH;
    ensure!(
        body.len() >= expected,
        "images body has {} bytes, expected {expected}",
        body.len()
    );
    Ok(body[..expected]
        .chunks(HEIGHT * WIDTH)
        .map(<[u8]>::to_vec)
        .collect())
}

/// Parses an IDX1 labels file.
pub fn parse_labels(bytes: &[u8]) -> Result<Vec<u8>> {
    let magic = read_u32(bytes, 0)?;
    ensure!(magic == LABELS_MAGIC, "bad labels magic {magic:#010x}");
    let count = read_u32(bytes, 4)? as usize;

    let body = &bytes[8..];
    ensure!(
        body.len() >= count,
        "labels body has {} bytes, expected {count}",
        body.len()
    );
    let labels = body[..count].to_vec();
    if let Some(label) = labels.iter().find(|&&l| l as usize >= NUM_CLASSES) {
        bail!("label {label} out of range");
    }
    Ok(labels)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn images_file(images: &[[u8; HEIGHT * WIDTH]]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(IMAGES_MAGIC.to_be_bytes());
        bytes.extend((images.len() as u32).to_be_bytes());
        bytes.extend((HEIGHT as u32).to_be_bytes());
        bytes.extend((WIDTH as u32).to_be_bytes());
        for image in images {
            bytes.extend_from_slice(image);
        }
        bytes
    }

    pub fn labels_file(labels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(LABELS_MAGIC.to_be_bytes());
        bytes.extend((labels.len() as u32).to_be_bytes());
        bytes.extend_from_slice(labels);
        bytes
    }

    #[test]
    fn parses_idx_files() {
        let mut second = [0u8; HEIGHT * WIDTH];
        second[0] = 255;
        second[HEIGHT * WIDTH - 1] = 7;
        let images = images_file(&[[0u8; HEIGHT * WIDTH], second]);
        let labels = labels_file(&[3, 9]);

        let dataset = MnistDataset::from_idx(&images, &labels).unwrap();
        assert_eq!(dataset.len(), 2);

        let item = dataset.get(1).unwrap();
        assert_eq!(item.label, 9);
        assert_eq!(item.image.len(), HEIGHT * WIDTH);
        assert_eq!(item.image[0], 255.0);
        assert_eq!(item.image[HEIGHT * WIDTH - 1], 7.0);
        assert!(dataset.get(2).is_none());
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut images = images_file(&[[0u8; HEIGHT * WIDTH]]);
        images[3] = 0x01;
        assert!(parse_images(&images).is_err());

        let mut labels = labels_file(&[1]);
        labels[3] = 0x03;
        assert!(parse_labels(&labels).is_err());
    }

    #[test]
    fn rejects_truncated_files() {
        let images = images_file(&[[0u8; HEIGHT * WIDTH]; 2]);
        assert!(parse_images(&images[..images.len() - 1]).is_err());
        assert!(parse_images(&images[..10]).is_err());

        let labels = labels_file(&[1, 2, 3]);
        assert!(parse_labels(&labels[..labels.len() - 1]).is_err());
    }

    #[test]
    fn rejects_bad_dimensions() {
        let mut images = images_file(&[[0u8; HEIGHT * WIDTH]]);
        images[8..12].copy_from_slice(&32u32.to_be_bytes());
        assert!(parse_images(&images).is_err());
    }

    #[test]
    fn rejects_out_of_range_labels() {
        assert!(parse_labels(&labels_file(&[0, 10])).is_err());
    }

    fn temp_root(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "burn-simple-cnn-{name}-{}",
            std::process::id()
        ));
        std::fs::remove_dir_all(&root).ok();
        root
    }

    #[test]
    fn loads_existing_split_files_without_downloading() {
        let root = temp_root("mnist-root");
        let raw_dir = root.join("MNIST").join("raw");
        create_dir_all(&raw_dir).unwrap();

        let mut image = [0u8; HEIGHT * WIDTH];
        image[5] = 128;
        std::fs::write(
            raw_dir.join(TEST_IMAGES),
            images_file(&[[0u8; HEIGHT * WIDTH], image, [255u8; HEIGHT * WIDTH]]),
        )
        .unwrap();
        std::fs::write(raw_dir.join(TEST_LABELS), labels_file(&[0, 2, 8])).unwrap();

        let dataset = MnistDataset::test(&root).unwrap();
        std::fs::remove_dir_all(&root).ok();

        assert_eq!(dataset.len(), 3);
        let item = dataset.get(1).unwrap();
        assert_eq!(item.label, 2);
        assert_eq!(item.image[5], 128.0);
        assert_eq!(dataset.get(2).unwrap().image[0], 255.0);
    }

    #[test]
    fn failed_gunzip_leaves_no_file_behind() {
        let root = temp_root("gunzip-bad");
        create_dir_all(&root).unwrap();
        let file_name = root.join(TEST_LABELS);

        assert!(gunzip_into(b"not a gzip stream", &file_name).is_err());
        assert!(!file_name.exists());
        assert!(!file_name.with_extension("part").exists());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn gunzip_writes_the_decompressed_file() {
        use flate2::{Compression, write::GzEncoder};
        use std::io::Write;

        let root = temp_root("gunzip-ok");
        create_dir_all(&root).unwrap();
        let file_name = root.join(TEST_LABELS);

        let labels = labels_file(&[4, 1]);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&labels).unwrap();
        let gz_bytes = encoder.finish().unwrap();

        gunzip_into(&gz_bytes, &file_name).unwrap();
        let written = std::fs::read(&file_name).unwrap();
        std::fs::remove_dir_all(&root).ok();
        assert_eq!(written, labels);
        assert_eq!(parse_labels(&written).unwrap(), vec![4, 1]);
    }

    #[test]
    fn rejects_count_mismatch() {
        let images = images_file(&[[0u8; HEIGHT * WIDTH]; 2]);
        let labels = labels_file(&[1]);
        assert!(MnistDataset::from_idx(&images, &labels).is_err());
    }
}
