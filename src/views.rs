//! Course navigation tab variants, selected by their `type` tag.
//!
//! Each variant decides whether it is shown, whether a persisted tab definition
//! is valid, and where it links. Access rules are plain predicate functions
//! combined per variant.

use crate::key::CourseKey;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Namespace reported when a view type is not registered.
pub const COURSE_VIEW_TYPE_NAMESPACE: &str = "openedx.course_view_type";

/// Persisted JSON definition of one tab (`type`, `name`, `link`, `url_slug`, `is_hidden`).
pub type TabSpec = Map<String, Value>;

/// Access or feature check evaluated when deciding whether a tab is shown.
pub type Gate = fn(&ViewContext<'_>) -> bool;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ViewError {
    #[error("tab of type `{view_type}` is missing required key `{key}`")]
    MissingKey {
        view_type: String,
        key: &'static str,
    },
    #[error("no such plugin {name} for entry point {namespace}")]
    UnknownViewType {
        name: String,
        namespace: &'static str,
    },
    #[error("tab definition has no `type`")]
    MissingType,
}

/// Course attributes the view rules read.
#[derive(Clone, Debug)]
pub struct CourseInfo {
    pub id: CourseKey,
    pub hide_progress_tab: bool,
    pub allow_public_wiki_access: bool,
    pub syllabus_present: bool,
    /// Set while the course is rendered as a custom (CCX) course.
    pub in_custom_course: bool,
    pub textbooks: Vec<String>,
    pub pdf_textbooks: Vec<String>,
    pub html_textbooks: Vec<String>,
}

impl CourseInfo {
    pub fn new(id: CourseKey) -> Self {
        Self {
            id,
            hide_progress_tab: false,
            allow_public_wiki_access: false,
            syllabus_present: false,
            in_custom_course: false,
            textbooks: Vec::new(),
            pdf_textbooks: Vec::new(),
            html_textbooks: Vec::new(),
        }
    }
}

/// Platform-wide switches.
#[derive(Clone, Debug, Default)]
pub struct PlatformSettings {
    pub wiki_enabled: bool,
    pub features: BTreeMap<String, bool>,
}

impl PlatformSettings {
    pub fn with_feature(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.features.insert(name.into(), enabled);
        self
    }

    /// Unset features are off.
    pub fn feature(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }
}

/// The user looking at the course, with access already resolved for it.
#[derive(Clone, Debug, Default)]
pub struct Viewer {
    pub username: String,
    pub is_authenticated: bool,
    /// Course or global staff.
    pub is_staff: bool,
    pub is_enrolled: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct ViewContext<'a> {
    pub course: &'a CourseInfo,
    pub settings: &'a PlatformSettings,
    /// `None` when rendering without a user, e.g. for course authors.
    pub user: Option<&'a Viewer>,
}

pub fn requires_auth(ctx: &ViewContext<'_>) -> bool {
    ctx.user.is_none_or(|user| user.is_authenticated)
}

pub fn requires_enrollment_or_staff(ctx: &ViewContext<'_>) -> bool {
    ctx.user.is_none_or(|user| user.is_staff || user.is_enrolled)
}

pub fn requires_staff(ctx: &ViewContext<'_>) -> bool {
    ctx.user.is_none_or(|user| user.is_staff)
}

fn progress_visible(ctx: &ViewContext<'_>) -> bool {
    !ctx.course.hide_progress_tab
}

fn wiki_visible(ctx: &ViewContext<'_>) -> bool {
    ctx.settings.wiki_enabled
        && (ctx.user.is_none()
            || ctx.course.allow_public_wiki_access
            || requires_enrollment_or_staff(ctx))
}

fn discussion_service_enabled(ctx: &ViewContext<'_>) -> bool {
    ctx.settings.feature("ENABLE_DISCUSSION_SERVICE")
}

fn outside_custom_course(ctx: &ViewContext<'_>) -> bool {
    !(ctx.settings.feature("CUSTOM_COURSES_EDX") && ctx.course.in_custom_course)
}

fn textbooks_enabled(ctx: &ViewContext<'_>) -> bool {
    ctx.settings.feature("ENABLE_TEXTBOOK")
}

fn syllabus_present(ctx: &ViewContext<'_>) -> bool {
    ctx.course.syllabus_present
}

fn student_notes_enabled(ctx: &ViewContext<'_>) -> bool {
    ctx.settings.feature("ENABLE_STUDENT_NOTES")
}

/// One entry of a collection view, such as a single textbook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TabItem {
    pub name: String,
    pub tab_id: String,
    pub link: String,
}

/// A tab that passed its rules and can be linked to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTab {
    pub view_type: String,
    pub tab_id: Option<String>,
    pub name: String,
    pub link: Option<String>,
    pub items: Vec<TabItem>,
}

/// Behaviour of one tab variant.
pub trait CourseView: Send + Sync {
    fn view_type(&self) -> &str;

    /// Display name used when the tab definition carries none.
    fn title(&self) -> &str;

    fn is_enabled(&self, ctx: &ViewContext<'_>) -> bool;

    fn validate(&self, _tab: &TabSpec) -> Result<(), ViewError> {
        Ok(())
    }

    fn tab_id(&self, tab: &TabSpec) -> Option<String>;

    fn link_for(&self, course: &CourseInfo, tab: &TabSpec) -> Option<String>;

    fn items(&self, _course: &CourseInfo) -> Vec<TabItem> {
        Vec::new()
    }

    fn name_for(&self, tab: &TabSpec) -> String {
        string_key(tab, "name").unwrap_or(self.title()).to_owned()
    }

    fn is_movable(&self) -> bool {
        true
    }

    fn is_hideable(&self) -> bool {
        false
    }

    fn is_collection(&self) -> bool {
        false
    }

    fn is_hidden(&self, tab: &TabSpec) -> bool {
        self.is_hideable()
            && tab
                .get("is_hidden")
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }
}

#[derive(Clone, Copy)]
enum LinkKind {
    /// Course-relative route.
    Route(&'static str),
    /// `/courses/{id}/{url_slug}/`.
    StaticSlug,
    /// The tab's own `link` value.
    External,
    /// Collections link through their items.
    Collection(&'static str, &'static str, fn(&CourseInfo) -> &[String]),
}

/// Table-driven variant used for every built-in tab type.
pub struct BuiltinView {
    view_type: &'static str,
    title: &'static str,
    tab_id: Option<&'static str>,
    fixed_name: bool,
    gates: &'static [Gate],
    required_keys: &'static [&'static str],
    link: LinkKind,
    movable: bool,
    hideable: bool,
}

impl BuiltinView {
    fn new(view_type: &'static str, title: &'static str, link: LinkKind) -> Self {
        Self {
            view_type,
            title,
            tab_id: Some(view_type),
            fixed_name: false,
            gates: &[],
            required_keys: &[],
            link,
            movable: true,
            hideable: false,
        }
    }

    fn gated(mut self, gates: &'static [Gate]) -> Self {
        self.gates = gates;
        self
    }

    fn requires(mut self, keys: &'static [&'static str]) -> Self {
        self.required_keys = keys;
        self
    }

    fn with_tab_id(mut self, tab_id: Option<&'static str>) -> Self {
        self.tab_id = tab_id;
        self
    }

    fn fixed_name(mut self) -> Self {
        self.fixed_name = true;
        self
    }

    fn pinned(mut self) -> Self {
        self.movable = false;
        self
    }

    fn hideable(mut self) -> Self {
        self.hideable = true;
        self
    }
}

impl CourseView for BuiltinView {
    fn view_type(&self) -> &str {
        self.view_type
    }

    fn title(&self) -> &str {
        self.title
    }

    fn is_enabled(&self, ctx: &ViewContext<'_>) -> bool {
        self.gates.iter().all(|gate| gate(ctx))
    }

    fn validate(&self, tab: &TabSpec) -> Result<(), ViewError> {
        for key in self.required_keys {
            if !tab.contains_key(*key) {
                return Err(ViewError::MissingKey {
                    view_type: self.view_type.to_owned(),
                    key: *key,
                });
            }
        }
        Ok(())
    }

    fn tab_id(&self, tab: &TabSpec) -> Option<String> {
        match self.link {
            LinkKind::StaticSlug => {
                string_key(tab, "url_slug").map(|slug| format!("static_tab_{slug}"))
            }
            _ => self.tab_id.map(str::to_owned),
        }
    }

    fn link_for(&self, course: &CourseInfo, tab: &TabSpec) -> Option<String> {
        match self.link {
            LinkKind::Route(route) => Some(format!("/courses/{}/{route}/", course.id)),
            LinkKind::StaticSlug => {
                string_key(tab, "url_slug").map(|slug| format!("/courses/{}/{slug}/", course.id))
            }
            LinkKind::External => string_key(tab, "link").map(str::to_owned),
            LinkKind::Collection(..) => None,
        }
    }

    fn items(&self, course: &CourseInfo) -> Vec<TabItem> {
        let LinkKind::Collection(id_prefix, route, books) = self.link else {
            return Vec::new();
        };
        books(course)
            .iter()
            .enumerate()
            .map(|(index, title)| TabItem {
                name: title.clone(),
                tab_id: format!("{id_prefix}/{index}"),
                link: format!("/courses/{}/{route}/{index}/", course.id),
            })
            .collect()
    }

    fn name_for(&self, tab: &TabSpec) -> String {
        if self.fixed_name {
            return self.title.to_owned();
        }
        string_key(tab, "name").unwrap_or(self.title).to_owned()
    }

    fn is_movable(&self) -> bool {
        self.movable
    }

    fn is_hideable(&self) -> bool {
        self.hideable
    }

    fn is_collection(&self) -> bool {
        matches!(self.link, LinkKind::Collection(..))
    }
}

fn textbooks(course: &CourseInfo) -> &[String] {
    &course.textbooks
}

fn pdf_textbooks(course: &CourseInfo) -> &[String] {
    &course.pdf_textbooks
}

fn html_textbooks(course: &CourseInfo) -> &[String] {
    &course.html_textbooks
}

const AUTHENTICATED: &[Gate] = &[requires_auth];
const ENROLLED_OR_STAFF: &[Gate] = &[requires_enrollment_or_staff];
const PROGRESS: &[Gate] = &[requires_enrollment_or_staff, progress_visible];
const WIKI: &[Gate] = &[wiki_visible];
const DISCUSSION: &[Gate] = &[
    outside_custom_course,
    discussion_service_enabled,
    requires_enrollment_or_staff,
];
const TEXTBOOKS: &[Gate] = &[textbooks_enabled];
const SYLLABUS: &[Gate] = &[syllabus_present];
const NOTES: &[Gate] = &[student_notes_enabled];

/// Every built-in tab type.
pub fn builtin_views() -> Vec<BuiltinView> {
    vec![
        BuiltinView::new("courseware", "Courseware", LinkKind::Route("courseware"))
            .gated(ENROLLED_OR_STAFF)
            .fixed_name()
            .pinned(),
        BuiltinView::new("course_info", "Course Info", LinkKind::Route("info"))
            .with_tab_id(Some("info"))
            .requires(&["name"])
            .pinned(),
        BuiltinView::new("progress", "Progress", LinkKind::Route("progress"))
            .gated(PROGRESS)
            .requires(&["name"]),
        BuiltinView::new("wiki", "Wiki", LinkKind::Route("course_wiki"))
            .gated(WIKI)
            .requires(&["name"])
            .hideable(),
        BuiltinView::new("discussion", "Discussion", LinkKind::Route("discussion/forum"))
            .gated(DISCUSSION)
            .requires(&["name"]),
        BuiltinView::new("external_discussion", "Discussion", LinkKind::External)
            .with_tab_id(Some("discussion"))
            .requires(&["link"])
            .fixed_name(),
        // External links are never the active tab.
        BuiltinView::new("external_link", "External Link", LinkKind::External)
            .with_tab_id(None)
            .requires(&["link"]),
        BuiltinView::new("static_tab", "Custom Page", LinkKind::StaticSlug)
            .requires(&["name", "url_slug"]),
        BuiltinView::new(
            "textbooks",
            "Textbooks",
            LinkKind::Collection("textbook", "book", textbooks),
        )
        .gated(TEXTBOOKS)
        .fixed_name(),
        BuiltinView::new(
            "pdf_textbooks",
            "Textbooks",
            LinkKind::Collection("pdftextbook", "pdfbook", pdf_textbooks),
        )
        .gated(AUTHENTICATED)
        .fixed_name(),
        BuiltinView::new(
            "html_textbooks",
            "Textbooks",
            LinkKind::Collection("htmltextbook", "htmlbook", html_textbooks),
        )
        .gated(AUTHENTICATED)
        .fixed_name(),
        BuiltinView::new("syllabus", "Syllabus", LinkKind::Route("syllabus"))
            .gated(SYLLABUS)
            .fixed_name(),
        BuiltinView::new("notes", "Notes", LinkKind::Route("notes"))
            .gated(NOTES)
            .requires(&["name"]),
    ]
}

/// Tab variants keyed by their `type` tag.
#[derive(Clone, Default)]
pub struct CourseViewRegistry {
    views: BTreeMap<String, Arc<dyn CourseView>>,
}

impl CourseViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in tab type.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for view in builtin_views() {
            registry.register(Arc::new(view));
        }
        registry
    }

    /// Adds a variant, returning the one it replaced.
    pub fn register(&mut self, view: Arc<dyn CourseView>) -> Option<Arc<dyn CourseView>> {
        self.views.insert(view.view_type().to_owned(), view)
    }

    pub fn get(&self, name: &str) -> Result<&dyn CourseView, ViewError> {
        self.views
            .get(name)
            .map(|view| view.as_ref())
            .ok_or_else(|| ViewError::UnknownViewType {
                name: name.to_owned(),
                namespace: COURSE_VIEW_TYPE_NAMESPACE,
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.views.keys().map(String::as_str)
    }

    /// Validates a tab definition against the variant named by its `type`.
    pub fn validate(&self, tab: &TabSpec) -> Result<(), ViewError> {
        let view_type = string_key(tab, "type").ok_or(ViewError::MissingType)?;
        self.get(view_type)?.validate(tab)
    }

    /// Tabs to show in `ctx`, in definition order. Unknown, invalid, hidden and
    /// disabled tabs are dropped.
    pub fn visible_tabs(&self, ctx: &ViewContext<'_>, tabs: &[TabSpec]) -> Vec<ResolvedTab> {
        let mut visible = Vec::new();
        for tab in tabs {
            let view = match string_key(tab, "type").ok_or(ViewError::MissingType) {
                Ok(view_type) => self.get(view_type),
                Err(err) => Err(err),
            };
            let view = match view.and_then(|view| view.validate(tab).map(|()| view)) {
                Ok(view) => view,
                Err(err) => {
                    warn!(course = %ctx.course.id, error = %err, "skipping course tab");
                    continue;
                }
            };
            if view.is_hidden(tab) || !view.is_enabled(ctx) {
                continue;
            }
            visible.push(ResolvedTab {
                view_type: view.view_type().to_owned(),
                tab_id: view.tab_id(tab),
                name: view.name_for(tab),
                link: view.link_for(ctx.course, tab),
                items: view.items(ctx.course),
            });
        }
        visible
    }
}

fn string_key<'a>(tab: &'a TabSpec, key: &str) -> Option<&'a str> {
    tab.get(key).and_then(Value::as_str)
}
