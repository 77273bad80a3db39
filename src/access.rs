//! Download authorisation for converted markup files.
//!
//! [`AccessGate::can_download`] is a pure function of the requester, the
//! article, the journal's access policy, the requested file name and the
//! current time. The host gathers those facts (roles, signoffs, payments,
//! subscriptions) up front; nothing here touches storage, which keeps the
//! rules easy to test exhaustively.
//!
//! Rules, first match wins:
//!
//! 1. article not fully published and the requester holds a draft role → allow
//! 2. article not fully published → deny
//! 3. subscribed domain → allow
//! 4. no subscription required, open access article, journal does not
//!    restrict article access, or logged-in subscriber → allow
//! 5. payments enabled: non-PDF file under the only-PDF restriction → allow;
//!    anonymous → deny (login required); otherwise allow iff the article or
//!    issue was purchased or the membership is still running
//! 6. deny
//!
//! A published-path denial (5 or 6) still lets a draft-role holder through,
//! so editors are never locked out of a published article's files.

use crate::model::{ArticleId, JournalId, UserId, REVIEW_VARIANT};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Journal roles that can grant access to unpublished files.
///
/// Declaration order is precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    SiteAdmin,
    JournalManager,
    Editor,
    SectionEditor,
    LayoutEditor,
    Proofreader,
    Copyeditor,
    Author,
    Reviewer,
}

/// A role held by a user, scoped to a journal (site admins are global).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role: Role,
    pub journal: Option<JournalId>,
}

impl RoleGrant {
    pub fn site_admin() -> Self {
        Self {
            role: Role::SiteAdmin,
            journal: None,
        }
    }

    pub fn in_journal(role: Role, journal: JournalId) -> Self {
        Self {
            role,
            journal: Some(journal),
        }
    }
}

/// What the requester has paid for or subscribes to, relative to one article.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entitlements {
    /// The request comes from a subscribing institution's domain or IP range.
    pub subscribed_domain: bool,
    pub subscribed_user: bool,
    pub purchased_article: bool,
    pub purchased_issue: bool,
    pub membership_ends: Option<DateTime<Utc>>,
}

/// Who is asking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requester {
    /// `None` for anonymous readers.
    pub user: Option<UserId>,
    pub roles: Vec<RoleGrant>,
    pub entitlements: Entitlements,
}

impl Requester {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_logged_in(&self) -> bool {
        self.user.is_some()
    }

    fn holds(&self, role: Role, journal: JournalId) -> bool {
        self.roles.iter().any(|g| {
            g.role == role && (g.role == Role::SiteAdmin || g.journal == Some(journal))
        })
    }
}

/// Editorial status of an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ArticleStatus {
    #[default]
    Unsubmitted,
    Queued,
    Scheduled,
    Published,
    Declined,
    Archived,
}

/// Facts about the article, including who works on it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleAccess {
    pub article: ArticleId,
    pub journal: JournalId,
    pub status: ArticleStatus,
    /// The submission has a submitted date.
    pub submitted: bool,
    pub issue_published: bool,
    /// Issue requires a subscription to read.
    pub subscription_required: bool,
    /// Article-level open access override.
    pub open_access: bool,
    pub submitter: Option<UserId>,
    pub section_editors: Vec<UserId>,
    pub layout_signoffs: Vec<UserId>,
    pub proofing_signoffs: Vec<UserId>,
    pub copyeditors: Vec<UserId>,
    pub reviewers: Vec<UserId>,
}

impl ArticleAccess {
    pub fn fully_published(&self) -> bool {
        self.status == ArticleStatus::Published && self.issue_published
    }
}

/// Journal-wide access settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessPolicy {
    /// Restricted article content requires login even without a subscription check.
    pub restrict_article_access: bool,
    pub purchase_article_enabled: bool,
    pub purchase_issue_enabled: bool,
    pub membership_enabled: bool,
    /// Only PDF galleys are behind the paywall.
    pub only_pdf_restricted: bool,
    /// Reviewers may only fetch the author-redacted PDF.
    pub review_version: bool,
}

impl AccessPolicy {
    pub fn payments_enabled(&self) -> bool {
        self.purchase_article_enabled || self.purchase_issue_enabled || self.membership_enabled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllowReason {
    DraftRole(Role),
    SubscribedDomain,
    NoSubscriptionRequired,
    OpenAccess,
    UnrestrictedArticles,
    Subscriber,
    UnrestrictedFormat,
    Purchased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenyReason {
    NotPublished,
    LoginRequired,
    PaymentRequired,
    SubscriptionRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessDecision {
    Allow(AllowReason),
    Deny(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, AccessDecision::Allow(_))
    }
}

/// Stateless download gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessGate;

impl AccessGate {
    pub fn can_download(
        requester: &Requester,
        article: &ArticleAccess,
        policy: &AccessPolicy,
        file_name: &str,
        now: DateTime<Utc>,
    ) -> AccessDecision {
        let draft = Self::draft_role(requester, article, policy, file_name);

        if !article.fully_published() {
            return match draft {
                Some(role) => AccessDecision::Allow(AllowReason::DraftRole(role)),
                None => AccessDecision::Deny(DenyReason::NotPublished),
            };
        }

        match Self::published_decision(requester, article, policy, file_name, now) {
            AccessDecision::Deny(reason) => match draft {
                Some(role) => AccessDecision::Allow(AllowReason::DraftRole(role)),
                None => AccessDecision::Deny(reason),
            },
            allowed => allowed,
        }
    }

    fn published_decision(
        requester: &Requester,
        article: &ArticleAccess,
        policy: &AccessPolicy,
        file_name: &str,
        now: DateTime<Utc>,
    ) -> AccessDecision {
        let e = &requester.entitlements;
        if e.subscribed_domain {
            return AccessDecision::Allow(AllowReason::SubscribedDomain);
        }
        if !article.subscription_required {
            return AccessDecision::Allow(AllowReason::NoSubscriptionRequired);
        }
        if article.open_access {
            return AccessDecision::Allow(AllowReason::OpenAccess);
        }
        if !policy.restrict_article_access {
            return AccessDecision::Allow(AllowReason::UnrestrictedArticles);
        }
        if requester.is_logged_in() && e.subscribed_user {
            return AccessDecision::Allow(AllowReason::Subscriber);
        }

        if policy.payments_enabled() {
            if policy.only_pdf_restricted && !is_pdf(file_name) {
                return AccessDecision::Allow(AllowReason::UnrestrictedFormat);
            }
            if !requester.is_logged_in() {
                return AccessDecision::Deny(DenyReason::LoginRequired);
            }
            let member = e.membership_ends.is_some_and(|end| end > now);
            return if e.purchased_article || e.purchased_issue || member {
                AccessDecision::Allow(AllowReason::Purchased)
            } else {
                AccessDecision::Deny(DenyReason::PaymentRequired)
            };
        }

        AccessDecision::Deny(DenyReason::SubscriptionRequired)
    }

    /// Highest-precedence role that lets the requester see unpublished files.
    pub fn draft_role(
        requester: &Requester,
        article: &ArticleAccess,
        policy: &AccessPolicy,
        file_name: &str,
    ) -> Option<Role> {
        let user = requester.user?;
        let journal = article.journal;
        let has = |role| requester.holds(role, journal);

        if has(Role::SiteAdmin) {
            return Some(Role::SiteAdmin);
        }
        for role in [Role::JournalManager, Role::Editor] {
            if has(role) {
                return Some(role);
            }
        }
        if has(Role::SectionEditor) && article.submitted && article.section_editors.contains(&user)
        {
            return Some(Role::SectionEditor);
        }
        if has(Role::LayoutEditor) && article.layout_signoffs.contains(&user) {
            return Some(Role::LayoutEditor);
        }
        if has(Role::Proofreader) && article.proofing_signoffs.contains(&user) {
            return Some(Role::Proofreader);
        }
        if has(Role::Copyeditor) && article.copyeditors.contains(&user) {
            return Some(Role::Copyeditor);
        }
        if has(Role::Author)
            && article.submitter == Some(user)
            && matches!(article.status, ArticleStatus::Queued | ArticleStatus::Published)
        {
            return Some(Role::Author);
        }
        if has(Role::Reviewer)
            && article.reviewers.contains(&user)
            && (!policy.review_version || file_name == REVIEW_VARIANT)
        {
            return Some(Role::Reviewer);
        }
        None
    }
}

fn is_pdf(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const J: JournalId = JournalId(1);
    const U: UserId = UserId(50);

    fn published() -> ArticleAccess {
        ArticleAccess {
            article: ArticleId(10),
            journal: J,
            status: ArticleStatus::Published,
            submitted: true,
            issue_published: true,
            subscription_required: true,
            ..Default::default()
        }
    }

    fn draft() -> ArticleAccess {
        ArticleAccess {
            status: ArticleStatus::Queued,
            issue_published: false,
            ..published()
        }
    }

    fn user(roles: &[RoleGrant]) -> Requester {
        Requester {
            user: Some(U),
            roles: roles.to_vec(),
            entitlements: Entitlements::default(),
        }
    }

    fn restricted() -> AccessPolicy {
        AccessPolicy {
            restrict_article_access: true,
            ..Default::default()
        }
    }

    fn decide(r: &Requester, a: &ArticleAccess, p: &AccessPolicy, f: &str) -> AccessDecision {
        AccessGate::can_download(r, a, p, f, Utc::now())
    }

    #[test]
    fn open_access_anonymous_allowed() {
        let a = ArticleAccess {
            open_access: true,
            ..published()
        };
        let d = decide(&Requester::anonymous(), &a, &restricted(), "document.html");
        assert_eq!(d, AccessDecision::Allow(AllowReason::OpenAccess));
    }

    #[test]
    fn unpublished_anonymous_denied() {
        let d = decide(&Requester::anonymous(), &draft(), &restricted(), "document.html");
        assert_eq!(d, AccessDecision::Deny(DenyReason::NotPublished));
    }

    #[test]
    fn published_article_in_unpublished_issue_is_draft() {
        let a = ArticleAccess {
            issue_published: false,
            ..published()
        };
        let d = decide(&Requester::anonymous(), &a, &AccessPolicy::default(), "x.html");
        assert!(!d.is_allowed());
    }

    #[test]
    fn editor_sees_drafts() {
        let r = user(&[RoleGrant::in_journal(Role::Editor, J)]);
        let d = decide(&r, &draft(), &restricted(), "document.xml");
        assert_eq!(d, AccessDecision::Allow(AllowReason::DraftRole(Role::Editor)));
    }

    #[test]
    fn editor_of_other_journal_does_not() {
        let r = user(&[RoleGrant::in_journal(Role::Editor, JournalId(2))]);
        assert!(!decide(&r, &draft(), &restricted(), "document.xml").is_allowed());
    }

    #[test]
    fn site_admin_beats_everything() {
        let r = user(&[
            RoleGrant::in_journal(Role::Reviewer, J),
            RoleGrant::site_admin(),
        ]);
        let role = AccessGate::draft_role(&r, &draft(), &restricted(), "x");
        assert_eq!(role, Some(Role::SiteAdmin));
    }

    #[test]
    fn section_editor_needs_assignment_and_submission() {
        let r = user(&[RoleGrant::in_journal(Role::SectionEditor, J)]);
        let mut a = draft();
        assert_eq!(AccessGate::draft_role(&r, &a, &restricted(), "x"), None);
        a.section_editors.push(U);
        assert_eq!(
            AccessGate::draft_role(&r, &a, &restricted(), "x"),
            Some(Role::SectionEditor)
        );
        a.submitted = false;
        assert_eq!(AccessGate::draft_role(&r, &a, &restricted(), "x"), None);
    }

    #[test]
    fn signoff_roles() {
        let mut a = draft();
        a.layout_signoffs.push(U);
        let r = user(&[RoleGrant::in_journal(Role::LayoutEditor, J)]);
        assert_eq!(
            AccessGate::draft_role(&r, &a, &restricted(), "x"),
            Some(Role::LayoutEditor)
        );
        let r = user(&[RoleGrant::in_journal(Role::Proofreader, J)]);
        assert_eq!(AccessGate::draft_role(&r, &a, &restricted(), "x"), None);
        a.proofing_signoffs.push(U);
        assert_eq!(
            AccessGate::draft_role(&r, &a, &restricted(), "x"),
            Some(Role::Proofreader)
        );
    }

    #[test]
    fn author_only_for_queued_or_published() {
        let r = user(&[RoleGrant::in_journal(Role::Author, J)]);
        let mut a = draft();
        a.submitter = Some(U);
        assert_eq!(
            AccessGate::draft_role(&r, &a, &restricted(), "x"),
            Some(Role::Author)
        );
        a.status = ArticleStatus::Declined;
        assert_eq!(AccessGate::draft_role(&r, &a, &restricted(), "x"), None);
    }

    #[test]
    fn reviewer_limited_to_review_variant() {
        let r = user(&[RoleGrant::in_journal(Role::Reviewer, J)]);
        let mut a = draft();
        a.reviewers.push(U);
        let policy = AccessPolicy {
            review_version: true,
            ..restricted()
        };
        assert!(!decide(&r, &a, &policy, "document-new.pdf").is_allowed());
        assert!(decide(&r, &a, &policy, "document-review.pdf").is_allowed());
        assert!(decide(&r, &a, &restricted(), "document-new.pdf").is_allowed());
    }

    #[test]
    fn subscribed_domain_allowed() {
        let mut r = Requester::anonymous();
        r.entitlements.subscribed_domain = true;
        let d = decide(&r, &published(), &restricted(), "document.pdf");
        assert_eq!(d, AccessDecision::Allow(AllowReason::SubscribedDomain));
    }

    #[test]
    fn unrestricted_journal_allows_anonymous() {
        let d = decide(
            &Requester::anonymous(),
            &published(),
            &AccessPolicy::default(),
            "document.pdf",
        );
        assert_eq!(d, AccessDecision::Allow(AllowReason::UnrestrictedArticles));
    }

    #[test]
    fn subscriber_allowed() {
        let mut r = user(&[]);
        r.entitlements.subscribed_user = true;
        let d = decide(&r, &published(), &restricted(), "document.pdf");
        assert_eq!(d, AccessDecision::Allow(AllowReason::Subscriber));
    }

    #[test]
    fn payment_paths() {
        let policy = AccessPolicy {
            purchase_article_enabled: true,
            only_pdf_restricted: true,
            ..restricted()
        };
        let anon = Requester::anonymous();
        assert_eq!(
            decide(&anon, &published(), &policy, "document.html"),
            AccessDecision::Allow(AllowReason::UnrestrictedFormat)
        );
        assert_eq!(
            decide(&anon, &published(), &policy, "document-new.pdf"),
            AccessDecision::Deny(DenyReason::LoginRequired)
        );

        let mut r = user(&[]);
        assert_eq!(
            decide(&r, &published(), &policy, "document-new.pdf"),
            AccessDecision::Deny(DenyReason::PaymentRequired)
        );
        r.entitlements.purchased_issue = true;
        assert_eq!(
            decide(&r, &published(), &policy, "document-new.pdf"),
            AccessDecision::Allow(AllowReason::Purchased)
        );
    }

    #[test]
    fn membership_expiry_matters() {
        let policy = AccessPolicy {
            membership_enabled: true,
            ..restricted()
        };
        let now = Utc::now();
        let mut r = user(&[]);
        r.entitlements.membership_ends = Some(now - Duration::days(1));
        assert!(!AccessGate::can_download(&r, &published(), &policy, "a.pdf", now).is_allowed());
        r.entitlements.membership_ends = Some(now + Duration::days(1));
        assert!(AccessGate::can_download(&r, &published(), &policy, "a.pdf", now).is_allowed());
    }

    #[test]
    fn restricted_without_payments_denied() {
        let d = decide(&user(&[]), &published(), &restricted(), "document.html");
        assert_eq!(d, AccessDecision::Deny(DenyReason::SubscriptionRequired));
    }

    #[test]
    fn editor_never_locked_out_of_published() {
        let r = user(&[RoleGrant::in_journal(Role::JournalManager, J)]);
        let d = decide(&r, &published(), &restricted(), "document.html");
        assert_eq!(
            d,
            AccessDecision::Allow(AllowReason::DraftRole(Role::JournalManager))
        );
    }
}
