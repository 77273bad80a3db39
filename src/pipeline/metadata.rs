//! Builds the metadata payload that accompanies a submission.

use crate::config::JournalConfig;
use crate::model::{ArticleRecord, IssueRecord, JournalRecord, SubmissionMetadata};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("static regex"));

/// Header image names looked up in the journal css folder, in order.
pub const HEADER_IMAGE_NAMES: &[&str] = &["article_header.jpg", "article_header.png"];

/// Remove HTML tags, keeping their text content.
pub fn strip_tags(html: &str) -> String {
    TAG.replace_all(html, "").trim().to_string()
}

/// First header image present in `css_dir`.
pub fn find_header_image(css_dir: &Path) -> Option<&'static str> {
    HEADER_IMAGE_NAMES
        .iter()
        .copied()
        .find(|name| css_dir.join(name).is_file())
}

/// Assemble the submission payload for one article.
///
/// Issue details are only sent once the issue is published. The header
/// image URL is only sent when the image exists and the journal has a
/// public css URL.
pub fn build_metadata(
    article: &ArticleRecord,
    journal: &JournalRecord,
    issue: Option<&IssueRecord>,
    config: &JournalConfig,
    css_dir: &Path,
) -> SubmissionMetadata {
    let css_header_image_url = config.css_base_url.as_deref().and_then(|base| {
        find_header_image(css_dir).map(|name| {
            if base.ends_with('/') {
                format!("{base}{name}")
            } else {
                format!("{base}/{name}")
            }
        })
    });

    let published = issue.filter(|i| i.published);

    SubmissionMetadata {
        title: article.title.clone(),
        authors: article.authors.iter().map(Into::into).collect(),
        journal_id: journal.id,
        article_id: article.id,
        publication_name: journal.title.clone(),
        copyright: strip_tags(&journal.copyright_notice),
        publisher: strip_tags(&journal.publisher_note),
        rights: strip_tags(&journal.open_access_policy),
        eissn: journal.online_issn.clone(),
        issn: journal.print_issn.clone(),
        doi: article.doi.clone(),
        csl_style: config.csl_style.clone(),
        css_header_image_url,
        number: published.and_then(|i| i.number.clone()),
        volume: published.and_then(|i| i.volume),
        year: published.and_then(|i| i.year),
        publication_date: published.and_then(|i| i.date_published),
        review_version: config.review_version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArticleId, HostAuthor, IssueId, JournalId};
    use chrono::{TimeZone, Utc};

    fn article() -> ArticleRecord {
        ArticleRecord {
            id: ArticleId(9),
            journal_id: JournalId(2),
            title: "Rust in Publishing".into(),
            authors: vec![HostAuthor {
                first_name: "Grace".into(),
                last_name: "Hopper".into(),
                sequence: 1,
                biography: Some("bio".into()),
                ..Default::default()
            }],
            doi: Some("10.1234/abc".into()),
        }
    }

    fn journal() -> JournalRecord {
        JournalRecord {
            id: JournalId(2),
            title: "Journal of Things".into(),
            copyright_notice: "<p>Copyright <b>Authors</b></p>".into(),
            publisher_note: "Published by <i>Press</i>".into(),
            open_access_policy: "<div>Open</div>".into(),
            online_issn: Some("1234-5678".into()),
            print_issn: None,
        }
    }

    fn issue(published: bool) -> IssueRecord {
        IssueRecord {
            id: IssueId(1),
            number: Some("3".into()),
            volume: Some(12),
            year: Some(2024),
            date_published: Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()),
            published,
        }
    }

    #[test]
    fn strips_tags() {
        assert_eq!(strip_tags("<p>Hello <b>world</b></p>"), "Hello world");
        assert_eq!(strip_tags("plain"), "plain");
        assert_eq!(strip_tags(""), "");
    }

    #[test]
    fn notices_are_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let config = JournalConfig::default();
        let m = build_metadata(&article(), &journal(), None, &config, dir.path());
        assert_eq!(m.copyright, "Copyright Authors");
        assert_eq!(m.publisher, "Published by Press");
        assert_eq!(m.rights, "Open");
        assert_eq!(m.eissn.as_deref(), Some("1234-5678"));
        assert_eq!(m.csl_style, "chicago-author-date.csl");
        assert_eq!(m.authors.len(), 1);
    }

    #[test]
    fn issue_fields_only_when_published() {
        let dir = tempfile::tempdir().unwrap();
        let config = JournalConfig::default();
        let unpublished = issue(false);
        let m = build_metadata(&article(), &journal(), Some(&unpublished), &config, dir.path());
        assert!(m.volume.is_none());
        assert!(m.publication_date.is_none());

        let published = issue(true);
        let m = build_metadata(&article(), &journal(), Some(&published), &config, dir.path());
        assert_eq!(m.volume, Some(12));
        assert_eq!(m.number.as_deref(), Some("3"));
        assert_eq!(m.year, Some(2024));
    }

    #[test]
    fn header_image_url_when_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("article_header.png"), b"png").unwrap();
        let config = JournalConfig::builder()
            .css_base_url("https://journal.example.org/css")
            .build()
            .unwrap();
        let m = build_metadata(&article(), &journal(), None, &config, dir.path());
        assert_eq!(
            m.css_header_image_url.as_deref(),
            Some("https://journal.example.org/css/article_header.png")
        );

        let none = build_metadata(&article(), &journal(), None, &JournalConfig::default(), dir.path());
        assert!(none.css_header_image_url.is_none());
    }

    #[test]
    fn review_flag_serialised_only_when_set() {
        let dir = tempfile::tempdir().unwrap();
        let m = build_metadata(&article(), &journal(), None, &JournalConfig::default(), dir.path());
        let v = serde_json::to_value(&m).unwrap();
        assert!(v.get("reviewVersion").is_none());

        let config = JournalConfig::builder().review_version(true).build().unwrap();
        let m = build_metadata(&article(), &journal(), None, &config, dir.path());
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["reviewVersion"], true);
        assert_eq!(v["DOI"], "10.1234/abc");
    }
}
