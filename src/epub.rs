use std::collections::{BTreeMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use scraper::Html;
use zip::write::SimpleFileOptions;

use crate::article::{Article, safe_identifier};
use crate::observe::{Event, Observer};

/// Returned by [`build`] when there is no article to put in the book. This is
/// an expected outcome of an incremental run, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("nothing to publish")]
pub struct NothingToPublish;

#[derive(Debug, Clone)]
pub struct Document {
    pub title: String,
    /// BCP-47 language tag used for EPUB metadata and XHTML documents.
    pub lang: String,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone)]
pub struct Chapter {
    /// Unique within the document; derived from the title.
    pub id: String,
    pub title: String,
    pub published_at: DateTime<Utc>,
    /// Rendered XHTML body fragment.
    pub body: String,
    pub article: Article,
}

impl Chapter {
    pub fn manifest_id(&self) -> String {
        format!("chapter-{}", self.id)
    }

    pub fn file_name(&self) -> String {
        format!("chapter-{}.xhtml", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub label: String,
    pub href: Option<String>,
    pub children: Vec<TocEntry>,
}

pub const NAV_ID: &str = "nav";

impl Document {
    pub fn chapters(&self) -> impl Iterator<Item = &Chapter> {
        self.sections.iter().flat_map(|section| section.chapters.iter())
    }

    pub fn articles(&self) -> impl Iterator<Item = &Article> {
        self.chapters().map(|chapter| &chapter.article)
    }

    /// Reading order: the navigation page, then every chapter in
    /// section-then-date order.
    pub fn spine(&self) -> Vec<String> {
        std::iter::once(NAV_ID.to_owned())
            .chain(self.chapters().map(Chapter::manifest_id))
            .collect()
    }

    pub fn toc(&self) -> Vec<TocEntry> {
        self.sections
            .iter()
            .map(|section| TocEntry {
                label: section.name.clone(),
                href: None,
                children: section
                    .chapters
                    .iter()
                    .map(|chapter| TocEntry {
                        label: chapter.title.clone(),
                        href: Some(chapter.file_name()),
                        children: Vec::new(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Output file name without extension: the safe title, or `news`.
    pub fn file_stem(&self) -> String {
        let stem = safe_identifier(&self.title);
        if stem.is_empty() {
            "news".to_owned()
        } else {
            stem
        }
    }
}

/// Renders every article into a chapter. Articles are ordered by publication
/// date within their section; sections are ordered by name. Articles whose
/// content cannot be resolved are reported to `observer` and left out.
pub fn build(
    title: &str,
    lang: &str,
    sections: BTreeMap<String, Vec<Article>>,
    observer: &dyn Observer,
) -> anyhow::Result<Document> {
    let total: usize = sections.values().map(Vec::len).sum();
    if total == 0 {
        return Err(NothingToPublish.into());
    }

    let lang = lang.trim();
    let lang = if lang.is_empty() { "und" } else { lang };

    let mut ids = ChapterIds::default();
    let mut rendered = Vec::new();
    for (name, mut articles) in sections {
        articles.sort_by_key(|article| article.published_at);

        let mut chapters = Vec::with_capacity(articles.len());
        for article in articles {
            let content = match article.content.resolve() {
                Ok(content) => content,
                Err(err) => {
                    observer.event(Event::ArticleSkipped {
                        title: &article.title,
                        url: article.url.as_deref(),
                        error: &err,
                    });
                    continue;
                }
            };

            chapters.push(Chapter {
                id: ids.assign(&article.title),
                title: article.title.clone(),
                published_at: article.published_at,
                body: render_chapter_body(&article.title, &article.published_at, &content),
                article,
            });
        }

        if !chapters.is_empty() {
            rendered.push(Section { name, chapters });
        }
    }

    if rendered.is_empty() {
        return Err(NothingToPublish.into());
    }

    Ok(Document {
        title: title.to_owned(),
        lang: lang.to_owned(),
        sections: rendered,
    })
}

/// Writes `document` as `<out_dir>/<safe title>.epub` and returns the path.
/// An existing book is never replaced unless `force`; the new one gets the
/// first free `-2`, `-3`, ... suffix instead.
pub fn write(document: &Document, out_dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("create epub output dir: {}", out_dir.display()))?;

    let uuid = uuid::Uuid::new_v4();
    let modified = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

    let container_xml = render_container_xml();
    let css = default_style_css();
    let nav_xhtml = render_nav_xhtml(document);
    let toc_ncx = render_toc_ncx(document, uuid);
    let content_opf = render_content_opf(document, uuid, &modified);

    let (out_path, out_file) = create_output(out_dir, &document.file_stem(), force)?;

    let mut zip = zip::ZipWriter::new(out_file);

    // `mimetype` must be the first entry and must be stored uncompressed.
    let mimetype_options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    zip.start_file("mimetype", mimetype_options)
        .context("epub start_file mimetype")?;
    zip.write_all(b"application/epub+zip")
        .context("epub write mimetype")?;

    let deflated_options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let fixed_parts = [
        ("META-INF/container.xml", container_xml),
        ("OEBPS/content.opf", content_opf),
        ("OEBPS/nav.xhtml", nav_xhtml),
        ("OEBPS/toc.ncx", toc_ncx),
        ("OEBPS/style.css", css),
    ];
    for (name, contents) in &fixed_parts {
        zip.start_file(*name, deflated_options)
            .with_context(|| format!("epub start_file {name}"))?;
        zip.write_all(contents.as_bytes())
            .with_context(|| format!("epub write {name}"))?;
    }

    for chapter in document.chapters() {
        let xhtml = wrap_xhtml_document(&chapter.title, &document.lang, &chapter.body);
        zip.start_file(format!("OEBPS/{}", chapter.file_name()), deflated_options)
            .with_context(|| format!("epub start_file chapter: {}", chapter.id))?;
        zip.write_all(xhtml.as_bytes())
            .with_context(|| format!("epub write chapter: {}", chapter.id))?;
    }

    zip.finish().context("epub finish zip")?;
    Ok(out_path)
}

fn create_output(
    out_dir: &Path,
    stem: &str,
    force: bool,
) -> anyhow::Result<(PathBuf, fs::File)> {
    if force {
        let path = out_dir.join(format!("{stem}.epub"));
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("open epub output: {}", path.display()))?;
        return Ok((path, file));
    }

    let mut n = 1_u32;
    loop {
        let name = if n == 1 {
            format!("{stem}.epub")
        } else {
            format!("{stem}-{n}.epub")
        };
        let path = out_dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(path = %path.display(), "epub name taken");
                n += 1;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("open epub output: {}", path.display()));
            }
        }
    }
}

#[derive(Debug, Default)]
struct ChapterIds {
    used: HashSet<String>,
}

impl ChapterIds {
    /// Suffixes `-2`, `-3`, ... when two titles reduce to the same id.
    fn assign(&mut self, title: &str) -> String {
        let mut base = safe_identifier(title);
        if base.is_empty() {
            base = "untitled".to_owned();
        }

        let mut candidate = base.clone();
        let mut n = 1_u32;
        while self.used.contains(&candidate) {
            n += 1;
            candidate = format!("{base}-{n}");
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

fn render_chapter_body(title: &str, published_at: &DateTime<Utc>, content: &str) -> String {
    format!(
        "<h1>{}</h1><h6>{}</h6>{}",
        xml_escape(title),
        published_at.format("%Y-%m-%d %H:%M:%S"),
        to_xhtml_fragment(content)
    )
}

/// Re-parses `html` as a fragment so unclosed elements, unquoted attributes
/// and HTML-only entities come out in serialized form, then patches what the
/// HTML serializer still emits that XHTML rejects.
fn to_xhtml_fragment(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let serialized = fragment.root_element().inner_html();
    ensure_xhtml_void_tags(&replace_nbsp(&serialized))
}

fn render_container_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#
    .to_string()
}

fn default_style_css() -> String {
    r#"@charset "utf-8";

html { font-family: serif; }
body { margin: 0; padding: 0 1.2em; line-height: 1.6; }
h1 { font-size: 1.4em; margin-bottom: 0.2em; }
h6 { font-size: 0.8em; font-weight: normal; color: #555; margin-top: 0; }
img { max-width: 100%; height: auto; }
blockquote { margin: 1em 0; padding: 0 1em; border-left: 4px solid #ddd; color: #333; }
"#
    .to_string()
}

fn render_nav_xhtml(document: &Document) -> String {
    let title = xml_escape(&document.title);
    let lang = xml_escape(&document.lang);

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" lang=\"{lang}\" xml:lang=\"{lang}\">\n"
    ));
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{title}</title>\n"));
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str("  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(&format!("  <h1>{title}</h1>\n"));
    out.push_str("  <nav epub:type=\"toc\" id=\"toc\">\n");
    out.push_str("    <ol>\n");
    for entry in document.toc() {
        out.push_str(&format!(
            "      <li><span>{}</span>\n",
            xml_escape(&entry.label)
        ));
        out.push_str("        <ol>\n");
        for child in &entry.children {
            out.push_str(&format!(
                "          <li><a href=\"{}\">{}</a></li>\n",
                xml_escape(child.href.as_deref().unwrap_or_default()),
                xml_escape(&child.label)
            ));
        }
        out.push_str("        </ol>\n");
        out.push_str("      </li>\n");
    }
    out.push_str("    </ol>\n");
    out.push_str("  </nav>\n");
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

fn render_toc_ncx(document: &Document, uuid: uuid::Uuid) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(
        "<!DOCTYPE ncx PUBLIC \"-//NISO//DTD ncx 2005-1//EN\" \"http://www.daisy.org/z3986/2005/ncx-2005-1.dtd\">\n",
    );
    out.push_str("<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n");
    out.push_str("  <head>\n");
    out.push_str(&format!(
        "    <meta name=\"dtb:uid\" content=\"urn:uuid:{uuid}\" />\n"
    ));
    out.push_str("    <meta name=\"dtb:depth\" content=\"2\" />\n");
    out.push_str("    <meta name=\"dtb:totalPageCount\" content=\"0\" />\n");
    out.push_str("    <meta name=\"dtb:maxPageNumber\" content=\"0\" />\n");
    out.push_str("  </head>\n");
    out.push_str("  <docTitle><text>");
    out.push_str(&xml_escape(&document.title));
    out.push_str("</text></docTitle>\n");
    out.push_str("  <navMap>\n");

    // A section shares its playOrder with its first chapter since both point
    // at the same content document.
    let mut play = 0_usize;
    for (section_idx, section) in document.sections.iter().enumerate() {
        let Some(first) = section.chapters.first() else {
            continue;
        };
        out.push_str(&format!(
            "    <navPoint id=\"section-{}\" playOrder=\"{}\">\n",
            section_idx + 1,
            play + 1
        ));
        out.push_str("      <navLabel><text>");
        out.push_str(&xml_escape(&section.name));
        out.push_str("</text></navLabel>\n");
        out.push_str(&format!(
            "      <content src=\"{}\" />\n",
            xml_escape(&first.file_name())
        ));
        for chapter in &section.chapters {
            play += 1;
            out.push_str(&format!(
                "      <navPoint id=\"navPoint-{play}\" playOrder=\"{play}\">\n"
            ));
            out.push_str("        <navLabel><text>");
            out.push_str(&xml_escape(&chapter.title));
            out.push_str("</text></navLabel>\n");
            out.push_str(&format!(
                "        <content src=\"{}\" />\n",
                xml_escape(&chapter.file_name())
            ));
            out.push_str("      </navPoint>\n");
        }
        out.push_str("    </navPoint>\n");
    }
    out.push_str("  </navMap>\n");
    out.push_str("</ncx>\n");
    out
}

fn render_content_opf(document: &Document, uuid: uuid::Uuid, modified: &str) -> String {
    let lang = xml_escape(&document.lang);

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(&format!(
        "<package xmlns=\"http://www.idpf.org/2007/opf\" unique-identifier=\"bookid\" version=\"3.0\" xml:lang=\"{lang}\">\n"
    ));
    out.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n");
    out.push_str(&format!(
        "    <dc:identifier id=\"bookid\">urn:uuid:{uuid}</dc:identifier>\n"
    ));
    out.push_str(&format!(
        "    <dc:title>{}</dc:title>\n",
        xml_escape(&document.title)
    ));
    out.push_str(&format!("    <dc:language>{lang}</dc:language>\n"));
    out.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{}</meta>\n",
        xml_escape(modified)
    ));
    out.push_str("  </metadata>\n");
    out.push_str("  <manifest>\n");
    out.push_str(&format!(
        "    <item id=\"{NAV_ID}\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\" />\n"
    ));
    out.push_str(
        "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\" />\n",
    );
    out.push_str("    <item id=\"css\" href=\"style.css\" media-type=\"text/css\" />\n");
    for chapter in document.chapters() {
        out.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"application/xhtml+xml\" />\n",
            xml_escape(&chapter.manifest_id()),
            xml_escape(&chapter.file_name())
        ));
    }
    out.push_str("  </manifest>\n");
    out.push_str("  <spine toc=\"ncx\">\n");
    for idref in document.spine() {
        out.push_str(&format!("    <itemref idref=\"{}\" />\n", xml_escape(&idref)));
    }
    out.push_str("  </spine>\n");
    out.push_str("</package>\n");
    out
}

fn wrap_xhtml_document(title: &str, lang: &str, body_html: &str) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" lang=\"{}\" xml:lang=\"{}\">\n",
        xml_escape(lang),
        xml_escape(lang)
    ));
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(title)));
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str("  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(body_html);
    if !body_html.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

// `&nbsp;` is the only named entity the serializer writes besides the XML
// ones, and XHTML does not define it.
fn replace_nbsp(html: &str) -> String {
    html.replace("&nbsp;", "&#160;")
}

fn ensure_xhtml_void_tags(html: &str) -> String {
    // Convert void tags like `<br>` into `<br />` to keep EPUB XHTML well-formed.
    const VOID_TAGS: &[&str] = &[
        "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
        "source", "track", "wbr",
    ];

    let bytes = html.as_bytes();
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;

    while let Some(rel_lt) = html[cursor..].find('<') {
        let lt = cursor + rel_lt;
        out.push_str(&html[cursor..lt]);

        // Find the closing `>` while respecting quoted attribute values.
        let mut in_quote: Option<u8> = None;
        let mut gt = lt + 1;
        while gt < bytes.len() {
            let b = bytes[gt];
            if let Some(q) = in_quote {
                if b == q {
                    in_quote = None;
                }
                gt += 1;
                continue;
            }
            if b == b'"' || b == b'\'' {
                in_quote = Some(b);
                gt += 1;
                continue;
            }
            if b == b'>' {
                break;
            }
            gt += 1;
        }
        if gt >= bytes.len() {
            out.push_str(&html[lt..]);
            return out;
        }

        let raw_tag = &html[lt..=gt];

        // Comments, doctypes, processing instructions and end tags.
        if raw_tag
            .as_bytes()
            .get(1)
            .is_some_and(|b| matches!(b, b'!' | b'?' | b'/'))
        {
            out.push_str(raw_tag);
            cursor = gt + 1;
            continue;
        }

        let name_start = lt + 1;
        let mut name_end = name_start;
        while name_end < gt && (bytes[name_end] as char).is_ascii_alphabetic() {
            name_end += 1;
        }
        let tag_name = html[name_start..name_end].to_ascii_lowercase();
        if tag_name.is_empty() || !VOID_TAGS.contains(&tag_name.as_str()) {
            out.push_str(raw_tag);
            cursor = gt + 1;
            continue;
        }

        let tag_without_gt = &html[lt..gt];
        if tag_without_gt.trim_end().ends_with('/') {
            out.push_str(raw_tag);
        } else {
            out.push_str(tag_without_gt);
            out.push_str(" />");
        }

        cursor = gt + 1;
    }

    out.push_str(&html[cursor..]);
    out
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
