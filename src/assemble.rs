//! Document assembly: global image naming, asset storage and the final write.
//!
//! The [`Assembler`] is the only component that touches the output location.
//! It owns the run's [`ImageNameAllocator`], stores images on behalf of the
//! reconciler through the [`ImageSink`] handle, collects page fragments in
//! page order and writes the Markdown file atomically in [`Assembler::finish`].
//!
//! A run is all-or-nothing. Dropping an `Assembler` that was never finished
//! removes every image it wrote, and the images directory too when this run
//! created it. A file from an earlier run that this run overwrote is put
//! back with its previous content.

use crate::config::{ConversionConfig, PageSeparator};
use crate::error::Pdf2MdError;
use crate::model::{EmbeddedImage, ImageFormat, MarkdownFragment};
use crate::resolve::{encode_asset_path, page_anchor_id};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Hands out run-unique image file names: `0001.png`, `0002.jpg`, …
///
/// The counter only moves forward, so names are strictly increasing in the
/// order images are stored (page order, then in-page order).
#[derive(Debug, Clone, Default)]
pub struct ImageNameAllocator {
    next: usize,
    prefix: Option<String>,
}

impl ImageNameAllocator {
    pub fn new(prefix: Option<String>) -> Self {
        Self {
            next: 1,
            prefix: prefix.filter(|p| !p.is_empty()),
        }
    }

    /// Allocate the next name for an image of `format`.
    pub fn next_name(&mut self, format: ImageFormat) -> String {
        let index = self.next.max(1);
        self.next = index + 1;
        match &self.prefix {
            Some(prefix) => format!("{prefix}_{index:04}.{}", format.extension()),
            None => format!("{index:04}.{}", format.extension()),
        }
    }

    /// Number of names handed out so far.
    pub fn allocated(&self) -> usize {
        self.next.saturating_sub(1)
    }
}

/// A stored image, as the reconciler needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    /// Bare file name inside the images directory.
    pub file_name: String,
    /// Percent-encoded path relative to the Markdown file, `/`-separated.
    pub markdown_path: String,
}

/// Storage handle passed to the reconciler.
pub trait ImageSink {
    /// Persist `image` under the next global name.
    fn store(&mut self, image: &EmbeddedImage) -> Result<StoredImage, Pdf2MdError>;
}

/// Layout options for the assembled document.
#[derive(Debug, Clone, Default)]
pub struct AssemblerOptions {
    pub separator: PageSeparator,
    pub page_anchors: bool,
    pub image_prefix: Option<String>,
}

impl AssemblerOptions {
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            separator: config.page_separator.clone(),
            page_anchors: config.page_anchors,
            image_prefix: config.image_prefix.clone(),
        }
    }
}

/// Collects reconciled pages and owns every write of the run.
#[derive(Debug)]
pub struct Assembler {
    markdown_path: PathBuf,
    images_dir: PathBuf,
    /// Images directory relative to the Markdown file's directory.
    images_link_base: String,
    allocator: ImageNameAllocator,
    options: AssemblerOptions,
    fragments: Vec<MarkdownFragment>,
    written: Vec<PathBuf>,
    /// Previous content of files this run overwrote, keyed by path.
    replaced: Vec<(PathBuf, Vec<u8>)>,
    dir_ready: bool,
    created_dir: bool,
    committed: bool,
}

impl Assembler {
    pub fn new(
        markdown_path: impl Into<PathBuf>,
        images_dir: impl Into<PathBuf>,
        options: AssemblerOptions,
    ) -> Self {
        let markdown_path = markdown_path.into();
        let images_dir = images_dir.into();
        let markdown_dir = markdown_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let images_link_base = relative_link(&images_dir, &markdown_dir);

        Self {
            markdown_path,
            images_dir,
            images_link_base,
            allocator: ImageNameAllocator::new(options.image_prefix.clone()),
            options,
            fragments: Vec::new(),
            written: Vec::new(),
            replaced: Vec::new(),
            dir_ready: false,
            created_dir: false,
            committed: false,
        }
    }

    pub fn markdown_path(&self) -> &Path {
        &self.markdown_path
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Images written so far in this run.
    pub fn images_saved(&self) -> usize {
        self.written.len()
    }

    /// Queue a reconciled page. Pages must arrive in ascending order.
    pub fn push(&mut self, fragment: MarkdownFragment) -> Result<(), Pdf2MdError> {
        if let Some(last) = self.fragments.last() {
            if fragment.page_number <= last.page_number {
                return Err(Pdf2MdError::Internal(format!(
                    "page {} handed to the assembler after page {}",
                    fragment.page_number, last.page_number
                )));
            }
        }
        debug!(
            "Assembled page {} ({} bytes, {} images)",
            fragment.page_number,
            fragment.markdown.len(),
            fragment.images.len()
        );
        self.fragments.push(fragment);
        Ok(())
    }

    /// Write the Markdown file and commit the run's images.
    ///
    /// The file is written to a temporary sibling and renamed into place, so
    /// readers never observe a half-written document.
    pub fn finish(mut self) -> Result<String, Pdf2MdError> {
        let markdown = assemble_markdown(
            &self.fragments,
            &self.options.separator,
            self.options.page_anchors,
        );
        write_atomic(&self.markdown_path, &markdown)?;
        self.committed = true;
        self.replaced.clear();
        info!(
            "Wrote {} ({} pages, {} images)",
            self.markdown_path.display(),
            self.fragments.len(),
            self.written.len()
        );
        Ok(markdown)
    }

    fn ensure_images_dir(&mut self, page: usize) -> Result<(), Pdf2MdError> {
        if self.dir_ready {
            return Ok(());
        }
        let existed = self.images_dir.is_dir();
        std::fs::create_dir_all(&self.images_dir).map_err(|e| Pdf2MdError::AssetWriteFailed {
            page,
            path: self.images_dir.clone(),
            source: e,
        })?;
        self.created_dir = !existed;
        self.dir_ready = true;
        Ok(())
    }

    fn rollback(&mut self) {
        for path in self.written.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Could not remove {}: {}", path.display(), e);
            }
        }
        for (path, previous) in self.replaced.drain(..) {
            match std::fs::write(&path, &previous) {
                Ok(()) => debug!("Restored {}", path.display()),
                Err(e) => warn!("Could not restore {}: {}", path.display(), e),
            }
        }
        if self.created_dir {
            // Only succeeds when nothing else landed in the directory meanwhile.
            if let Err(e) = std::fs::remove_dir(&self.images_dir) {
                warn!("Could not remove {}: {}", self.images_dir.display(), e);
            }
        }
    }
}

impl ImageSink for Assembler {
    fn store(&mut self, image: &EmbeddedImage) -> Result<StoredImage, Pdf2MdError> {
        let page = image.page_number;
        self.ensure_images_dir(page)?;

        let file_name = self.allocator.next_name(image.format);
        let path = self.images_dir.join(&file_name);
        let write_err = |source: std::io::Error| Pdf2MdError::AssetWriteFailed {
            page,
            path: path.clone(),
            source,
        };
        if path.is_file() {
            let previous = std::fs::read(&path).map_err(write_err)?;
            debug!("Overwriting {} from an earlier run", path.display());
            self.replaced.push((path.clone(), previous));
        }
        std::fs::write(&path, &image.data).map_err(write_err)?;
        self.written.push(path);

        let link = if self.images_link_base.is_empty() {
            file_name.clone()
        } else {
            format!("{}/{}", self.images_link_base, file_name)
        };
        debug!(
            "Stored page {} image {} as {}",
            image.page_number, image.index_in_page, file_name
        );

        Ok(StoredImage {
            markdown_path: encode_asset_path(&link),
            file_name,
        })
    }
}

impl Drop for Assembler {
    fn drop(&mut self) {
        if !self.committed
            && (!self.written.is_empty() || !self.replaced.is_empty() || self.created_dir)
        {
            warn!(
                "Conversion did not complete; removing {} stored images",
                self.written.len()
            );
            self.rollback();
        }
    }
}

/// Join page fragments into the final document.
///
/// Trailing newlines of each fragment are normalised, pages are joined with
/// `separator` and the document ends with exactly one newline. Blank pages
/// contribute nothing unless page anchors are requested.
pub fn assemble_markdown(
    fragments: &[MarkdownFragment],
    separator: &PageSeparator,
    page_anchors: bool,
) -> String {
    let mut out = String::new();
    let mut first = true;

    for fragment in fragments {
        let body = fragment.markdown.trim_matches(['\n', '\r']);
        if body.trim().is_empty() && !page_anchors {
            continue;
        }
        if !first {
            out.push_str(&separator.render(fragment.page_number));
        }
        first = false;

        if page_anchors {
            out.push_str(&format!(
                "<a id=\"{}\"></a>",
                page_anchor_id(fragment.page_number)
            ));
            if !body.trim().is_empty() {
                out.push_str("\n\n");
            }
        }
        if !body.trim().is_empty() {
            out.push_str(body);
        }
    }

    if !out.is_empty() {
        out.push('\n');
    }
    out
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), Pdf2MdError> {
    let write_err = |source| Pdf2MdError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(write_err)?;
    tmp.write_all(contents.as_bytes()).map_err(write_err)?;
    tmp.flush().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Path of `target` relative to directory `base`, `/`-separated.
///
/// Falls back to `target` itself when the two cannot be related (for
/// example a relative target next to an absolute base on another drive).
fn relative_link(target: &Path, base: &Path) -> String {
    let (target, base) = match (absolutize(target), absolutize(base)) {
        (Some(t), Some(b)) => (t, b),
        _ => return to_forward_slashes(target),
    };

    let t: Vec<Component> = target.components().collect();
    let b: Vec<Component> = base.components().collect();
    if t.first() != b.first() {
        return to_forward_slashes(&target);
    }

    let common = t.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let mut parts: Vec<String> = Vec::new();
    parts.extend(b[common..].iter().map(|_| "..".to_string()));
    parts.extend(
        t[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );
    parts.join("/")
}

/// Make a path absolute and lexically drop `.` and `..` segments.
fn absolutize(path: &Path) -> Option<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

fn to_forward_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fragment(page: usize, markdown: &str) -> MarkdownFragment {
        MarkdownFragment {
            page_number: page,
            markdown: markdown.into(),
            images: Vec::new(),
            placeholders_removed: 0,
            images_appended: 0,
            links_applied: 0,
            links_dropped: Vec::new(),
        }
    }

    fn png(page: usize, index: usize) -> EmbeddedImage {
        EmbeddedImage::new(page, index, ImageFormat::Png, vec![0x89, b'P', b'N', b'G'])
    }

    #[test]
    fn allocator_is_monotonic_and_zero_padded() {
        let mut alloc = ImageNameAllocator::new(None);
        assert_eq!(alloc.next_name(ImageFormat::Png), "0001.png");
        assert_eq!(alloc.next_name(ImageFormat::Jpeg), "0002.jpg");
        assert_eq!(alloc.allocated(), 2);

        let mut prefixed = ImageNameAllocator::new(Some("report".into()));
        assert_eq!(prefixed.next_name(ImageFormat::Png), "report_0001.png");
    }

    #[test]
    fn store_writes_into_relative_images_dir() {
        let dir = TempDir::new().unwrap();
        let md = dir.path().join("doc.md");
        let images = dir.path().join("My Doc_images");
        let mut assembler = Assembler::new(&md, &images, AssemblerOptions::default());

        let stored = assembler.store(&png(1, 0)).unwrap();
        assert_eq!(stored.file_name, "0001.png");
        assert_eq!(stored.markdown_path, "My%20Doc_images/0001.png");
        assert!(images.join("0001.png").is_file());

        assembler.finish().unwrap();
        assert!(images.join("0001.png").is_file());
    }

    #[test]
    fn images_dir_outside_markdown_dir_uses_parent_segments() {
        let dir = TempDir::new().unwrap();
        let md = dir.path().join("docs").join("doc.md");
        let images = dir.path().join("assets").join("img");
        let mut assembler = Assembler::new(&md, &images, AssemblerOptions::default());

        let stored = assembler.store(&png(1, 0)).unwrap();
        assert_eq!(stored.markdown_path, "../assets/img/0001.png");
        assembler.finish().unwrap();
        assert!(md.is_file());
    }

    #[test]
    fn out_of_order_fragment_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut assembler = Assembler::new(
            dir.path().join("doc.md"),
            dir.path().join("img"),
            AssemblerOptions::default(),
        );
        assembler.push(fragment(2, "two")).unwrap();
        let err = assembler.push(fragment(1, "one")).unwrap_err();
        assert!(matches!(err, Pdf2MdError::Internal(_)));
    }

    #[test]
    fn drop_without_finish_rolls_back() {
        let dir = TempDir::new().unwrap();
        let md = dir.path().join("doc.md");
        let images = dir.path().join("doc_images");
        {
            let mut assembler = Assembler::new(&md, &images, AssemblerOptions::default());
            assembler.store(&png(1, 0)).unwrap();
            assembler.store(&png(1, 1)).unwrap();
            assembler.push(fragment(1, "text")).unwrap();
        }
        assert!(!images.exists());
        assert!(!md.exists());
    }

    #[test]
    fn rollback_keeps_preexisting_directory_and_files() {
        let dir = TempDir::new().unwrap();
        let images = dir.path().join("shared");
        std::fs::create_dir(&images).unwrap();
        std::fs::write(images.join("other.png"), b"x").unwrap();
        {
            let mut assembler = Assembler::new(
                dir.path().join("doc.md"),
                &images,
                AssemblerOptions {
                    image_prefix: Some("doc".into()),
                    ..Default::default()
                },
            );
            assembler.store(&png(1, 0)).unwrap();
            assert!(images.join("doc_0001.png").is_file());
        }
        assert!(images.join("other.png").is_file());
        assert!(!images.join("doc_0001.png").exists());
    }

    #[test]
    fn rollback_restores_image_from_earlier_run() {
        let dir = TempDir::new().unwrap();
        let images = dir.path().join("doc_images");
        std::fs::create_dir(&images).unwrap();
        std::fs::write(images.join("0001.png"), b"previous run").unwrap();
        {
            let mut assembler = Assembler::new(
                dir.path().join("doc.md"),
                &images,
                AssemblerOptions::default(),
            );
            let stored = assembler.store(&png(1, 0)).unwrap();
            assert_eq!(stored.file_name, "0001.png");
            assembler.store(&png(1, 1)).unwrap();
        }
        assert_eq!(std::fs::read(images.join("0001.png")).unwrap(), b"previous run");
        assert!(!images.join("0002.png").exists());
    }

    #[test]
    fn finished_run_keeps_overwritten_image() {
        let dir = TempDir::new().unwrap();
        let images = dir.path().join("doc_images");
        std::fs::create_dir(&images).unwrap();
        std::fs::write(images.join("0001.png"), b"previous run").unwrap();

        let mut assembler = Assembler::new(
            dir.path().join("doc.md"),
            &images,
            AssemblerOptions::default(),
        );
        assembler.store(&png(1, 0)).unwrap();
        assembler.finish().unwrap();
        assert_eq!(
            std::fs::read(images.join("0001.png")).unwrap(),
            vec![0x89, b'P', b'N', b'G']
        );
    }

    #[test]
    fn unwritable_images_dir_names_the_page() {
        let dir = TempDir::new().unwrap();
        // A regular file where the images directory should go.
        let images = dir.path().join("doc_images");
        std::fs::write(&images, b"not a directory").unwrap();

        let mut assembler = Assembler::new(
            dir.path().join("doc.md"),
            &images,
            AssemblerOptions::default(),
        );
        let err = assembler.store(&png(3, 0)).unwrap_err();
        assert!(matches!(err, Pdf2MdError::AssetWriteFailed { page: 3, .. }));
        assert_eq!(err.page(), Some(3));
        assert_eq!(err.stage(), crate::error::Stage::AssetWrite);
        drop(assembler);
        assert!(images.is_file());
    }

    #[test]
    fn no_images_means_no_directory() {
        let dir = TempDir::new().unwrap();
        let images = dir.path().join("doc_images");
        let mut assembler = Assembler::new(
            dir.path().join("doc.md"),
            &images,
            AssemblerOptions::default(),
        );
        assembler.push(fragment(1, "only text\n")).unwrap();
        let markdown = assembler.finish().unwrap();
        assert_eq!(markdown, "only text\n");
        assert!(!images.exists());
    }

    #[test]
    fn assemble_joins_with_single_blank_line() {
        let pages = vec![fragment(1, "# One\n\n"), fragment(2, "Two"), fragment(3, "\n")];
        assert_eq!(
            assemble_markdown(&pages, &PageSeparator::BlankLine, false),
            "# One\n\nTwo\n"
        );
    }

    #[test]
    fn assemble_with_anchors_and_rule() {
        let pages = vec![fragment(1, "One"), fragment(2, "Two")];
        assert_eq!(
            assemble_markdown(&pages, &PageSeparator::HorizontalRule, true),
            "<a id=\"page-1\"></a>\n\nOne\n\n---\n\n<a id=\"page-2\"></a>\n\nTwo\n"
        );
    }

    #[test]
    fn assemble_empty_document() {
        assert_eq!(assemble_markdown(&[], &PageSeparator::BlankLine, false), "");
    }
}
