//! In-memory fakes for the capability traits (testing only)
//!
//! Provides `FakeBrowser`, a scripted console page implementing
//! [`BrowserSession`], and `RecordingSink` / `FailingSink` implementing
//! [`NotificationSink`].

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::browser::{BrowserFault, BrowserSession, ElementHandle};
use crate::domain::NotifyError;
use crate::notify::{Attachment, NotificationSink, RunReport};

// ---------------------------------------------------------------------------
// FakeBrowser
// ---------------------------------------------------------------------------

/// Selector the fake answers with a row's menu trigger.
pub const MENU_TRIGGER: &str = "[aria-haspopup=\"menu\"]";
/// Selector the fake answers with the open menu's controls.
pub const MENU_ITEM: &str = "[role=\"menuitem\"]";
/// Selector for a row's explicit first cell.
pub const FIRST_CELL: &str = "td:first-child";
/// Selector for all cells of a row (tab-separated columns of its text).
pub const CELL: &str = "td";
pub const TOOLTIP: &str = "[role=\"tooltip\"]";
pub const USERNAME_INPUT: &str = "input[type=\"email\"]";
pub const PASSWORD_INPUT: &str = "input[type=\"password\"]";
pub const SUBMIT_BUTTON: &str = "button[type=\"submit\"]";
pub const LINK: &str = "a";

/// What activating the remediation control does to a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationEffect {
    /// Row text becomes healthy.
    Recover,
    /// Row keeps its failure marker.
    StayFailed,
    /// Row is removed from the table.
    Disappear,
    /// Activation raises a protocol fault.
    Fault(String),
}

/// A scripted table row.
#[derive(Debug, Clone)]
pub struct FakeRow {
    text: String,
    first_cell: Option<String>,
    tooltip: Option<String>,
    has_menu: bool,
    action_label: Option<String>,
    unreadable: bool,
    script: VecDeque<RemediationEffect>,
}

impl FakeRow {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            first_cell: None,
            tooltip: None,
            has_menu: true,
            action_label: Some("再試行".to_string()),
            unreadable: false,
            script: VecDeque::new(),
        }
    }

    pub fn with_first_cell(mut self, text: impl Into<String>) -> Self {
        self.first_cell = Some(text.into());
        self
    }

    pub fn with_tooltip(mut self, text: impl Into<String>) -> Self {
        self.tooltip = Some(text.into());
        self
    }

    pub fn without_menu(mut self) -> Self {
        self.has_menu = false;
        self
    }

    pub fn with_action_label(mut self, label: Option<&str>) -> Self {
        self.action_label = label.map(str::to_string);
        self
    }

    pub fn unreadable(mut self) -> Self {
        self.unreadable = true;
        self
    }

    /// Effects applied by successive remediations; `StayFailed` once exhausted.
    pub fn on_remediate<I>(mut self, effects: I) -> Self
    where
        I: IntoIterator<Item = RemediationEffect>,
    {
        self.script = effects.into_iter().collect();
        self
    }

    fn healthy_text(&self) -> String {
        let name = self.text.lines().next().unwrap_or("").split('\t').next().unwrap_or("");
        format!("{name}\t完了")
    }

    fn cells(&self) -> Vec<String> {
        self.text
            .split(['\t', '\n'])
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RowKey {
    selector: String,
    slot: usize,
}

#[derive(Debug, Clone)]
enum Node {
    Row(RowKey),
    FirstCell(RowKey),
    Cell(RowKey, usize),
    MenuTrigger(RowKey),
    MenuItem { row: RowKey, label: String },
    Tooltip(String),
    Field(&'static str),
    Submit,
    Link { label: String, url: String },
}

#[derive(Debug, Clone)]
struct LoginForm {
    username: String,
    password: String,
    landing_url: String,
}

/// Scripted in-memory console page.
///
/// Element handles are invalidated (generation bump) whenever the document is
/// replaced: on navigation, form submission, link clicks, and remediation.
#[derive(Debug)]
pub struct FakeBrowser {
    url: String,
    tables: BTreeMap<String, Vec<FakeRow>>,
    extra_menu_items: Vec<String>,
    links: Vec<(String, String)>,
    login: Option<LoginForm>,
    logged_in: bool,
    filled: HashMap<&'static str, String>,
    failing_locates: HashSet<String>,
    nav_faults: VecDeque<BrowserFault>,
    url_faults: HashMap<String, VecDeque<BrowserFault>>,
    screenshot_fails: bool,

    generation: u64,
    next_id: u64,
    nodes: HashMap<u64, Node>,
    open_menu: Option<RowKey>,
    hovered: Option<RowKey>,
    closed: bool,

    navigations: Vec<(String, tokio::time::Instant)>,
    locates: Vec<String>,
    remediations: usize,
    screenshots: Vec<PathBuf>,
    close_calls: usize,
}

impl Default for FakeBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self {
            url: "about:blank".to_string(),
            tables: BTreeMap::new(),
            extra_menu_items: vec!["詳細".to_string(), "削除".to_string()],
            links: Vec::new(),
            login: None,
            logged_in: false,
            filled: HashMap::new(),
            failing_locates: HashSet::new(),
            nav_faults: VecDeque::new(),
            url_faults: HashMap::new(),
            screenshot_fails: false,
            generation: 1,
            next_id: 1,
            nodes: HashMap::new(),
            open_menu: None,
            hovered: None,
            closed: false,
            navigations: Vec::new(),
            locates: Vec::new(),
            remediations: 0,
            screenshots: Vec::new(),
            close_calls: 0,
        }
    }

    /// Rows answered for `selector`.
    pub fn with_rows(mut self, selector: &str, rows: Vec<FakeRow>) -> Self {
        self.tables.insert(selector.to_string(), rows);
        self
    }

    /// Require form login with these credentials; successful submission lands
    /// on `landing_url`.
    pub fn with_login(mut self, username: &str, password: &str, landing_url: &str) -> Self {
        self.login = Some(LoginForm {
            username: username.to_string(),
            password: password.to_string(),
            landing_url: landing_url.to_string(),
        });
        self
    }

    /// A link with visible `label` that navigates to `url`.
    pub fn with_link(mut self, label: &str, url: &str) -> Self {
        self.links.push((label.to_string(), url.to_string()));
        self
    }

    /// Locating `selector` raises a protocol fault.
    pub fn failing_locate(mut self, selector: &str) -> Self {
        self.failing_locates.insert(selector.to_string());
        self
    }

    /// The next `times` navigations fail with a timeout.
    pub fn failing_navigation(mut self, times: usize) -> Self {
        for _ in 0..times {
            self.nav_faults
                .push_back(BrowserFault::timeout("navigate", Duration::from_secs(30)));
        }
        self
    }

    /// The next navigation fails with `fault`.
    pub fn failing_navigation_with(mut self, fault: BrowserFault) -> Self {
        self.nav_faults.push_back(fault);
        self
    }

    /// The next `times` navigations to `url` fail with a timeout.
    pub fn failing_navigation_to(mut self, url: &str, times: usize) -> Self {
        let faults = self.url_faults.entry(url.to_string()).or_default();
        for _ in 0..times {
            faults.push_back(BrowserFault::timeout("navigate", Duration::from_secs(30)));
        }
        self
    }

    pub fn failing_screenshots(mut self) -> Self {
        self.screenshot_fails = true;
        self
    }

    // -- inspection ---------------------------------------------------------

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.iter().map(|(url, _)| url.clone()).collect()
    }

    /// Instants at which each navigation was attempted.
    pub fn navigation_times(&self) -> Vec<tokio::time::Instant> {
        self.navigations.iter().map(|(_, at)| *at).collect()
    }

    /// How many times `selector` was passed to `locate_all`.
    pub fn locate_count(&self, selector: &str) -> usize {
        self.locates.iter().filter(|s| s.as_str() == selector).count()
    }

    /// Remediation controls activated.
    pub fn remediations(&self) -> usize {
        self.remediations
    }

    pub fn screenshots(&self) -> &[PathBuf] {
        &self.screenshots
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn row_texts(&self, selector: &str) -> Vec<String> {
        self.tables
            .get(selector)
            .map(|rows| rows.iter().map(|r| r.text.clone()).collect())
            .unwrap_or_default()
    }

    // -- internals ----------------------------------------------------------

    fn ensure_open(&self) -> Result<(), BrowserFault> {
        if self.closed {
            Err(BrowserFault::Closed)
        } else {
            Ok(())
        }
    }

    fn replace_document(&mut self) {
        self.generation += 1;
        self.nodes.clear();
        self.open_menu = None;
        self.hovered = None;
    }

    fn alloc(&mut self, node: Node) -> ElementHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, node);
        ElementHandle::new(id, self.generation)
    }

    fn node(&self, handle: ElementHandle) -> Result<Node, BrowserFault> {
        self.ensure_open()?;
        if handle.generation() != self.generation {
            return Err(BrowserFault::StaleHandle(handle.id()));
        }
        self.nodes
            .get(&handle.id())
            .cloned()
            .ok_or(BrowserFault::StaleHandle(handle.id()))
    }

    fn row(&self, key: &RowKey) -> Result<&FakeRow, BrowserFault> {
        self.tables
            .get(&key.selector)
            .and_then(|rows| rows.get(key.slot))
            .ok_or_else(|| BrowserFault::Protocol("node is detached from document".to_string()))
    }

    fn on_login_page(&self) -> bool {
        self.login.is_some() && !self.logged_in
    }

    fn submit_login(&mut self) {
        let Some(form) = self.login.clone() else {
            return;
        };
        let user_ok = self.filled.get("username") == Some(&form.username);
        let pass_ok = self.filled.get("password") == Some(&form.password);
        if user_ok && pass_ok {
            self.logged_in = true;
            self.url = form.landing_url;
            self.replace_document();
        }
    }

    fn remediate(&mut self, key: &RowKey) -> Result<(), BrowserFault> {
        let Some(rows) = self.tables.get_mut(&key.selector) else {
            return Err(BrowserFault::Protocol("table vanished".to_string()));
        };
        let Some(row) = rows.get_mut(key.slot) else {
            return Err(BrowserFault::Protocol("node is detached from document".to_string()));
        };
        let effect = row.script.pop_front().unwrap_or(RemediationEffect::StayFailed);
        match effect {
            RemediationEffect::Recover => {
                row.text = row.healthy_text();
                row.tooltip = None;
            }
            RemediationEffect::StayFailed => {}
            RemediationEffect::Disappear => {
                rows.remove(key.slot);
            }
            RemediationEffect::Fault(message) => {
                return Err(BrowserFault::Protocol(message));
            }
        }
        self.remediations += 1;
        self.replace_document();
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for FakeBrowser {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), BrowserFault> {
        self.ensure_open()?;
        self.navigations
            .push((url.to_string(), tokio::time::Instant::now()));
        if let Some(fault) = self.nav_faults.pop_front() {
            return Err(fault);
        }
        if let Some(fault) = self.url_faults.get_mut(url).and_then(VecDeque::pop_front) {
            return Err(fault);
        }
        self.url = if self.on_login_page() {
            format!("{}/login", url.trim_end_matches('/'))
        } else {
            url.to_string()
        };
        self.replace_document();
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, BrowserFault> {
        self.ensure_open()?;
        Ok(self.url.clone())
    }

    async fn locate_all(&mut self, selector: &str) -> Result<Vec<ElementHandle>, BrowserFault> {
        self.ensure_open()?;
        self.locates.push(selector.to_string());
        if self.failing_locates.contains(selector) {
            return Err(BrowserFault::Protocol(format!("invalid selector {selector}")));
        }

        if self.on_login_page() {
            let node = match selector {
                USERNAME_INPUT => Some(Node::Field("username")),
                PASSWORD_INPUT => Some(Node::Field("password")),
                SUBMIT_BUTTON => Some(Node::Submit),
                _ => None,
            };
            return Ok(node.into_iter().map(|n| self.alloc(n)).collect());
        }

        if let Some(rows) = self.tables.get(selector) {
            let keys: Vec<RowKey> = (0..rows.len())
                .map(|slot| RowKey {
                    selector: selector.to_string(),
                    slot,
                })
                .collect();
            return Ok(keys.into_iter().map(|k| self.alloc(Node::Row(k))).collect());
        }

        let nodes: Vec<Node> = match selector {
            MENU_ITEM => match &self.open_menu {
                Some(key) => {
                    let mut labels = self.extra_menu_items.clone();
                    if let Some(label) = self.row(key)?.action_label.clone() {
                        labels.push(label);
                    }
                    labels
                        .into_iter()
                        .map(|label| Node::MenuItem {
                            row: key.clone(),
                            label,
                        })
                        .collect()
                }
                None => Vec::new(),
            },
            TOOLTIP => match &self.hovered {
                Some(key) => self
                    .row(key)?
                    .tooltip
                    .clone()
                    .map(Node::Tooltip)
                    .into_iter()
                    .collect(),
                None => Vec::new(),
            },
            LINK => self
                .links
                .iter()
                .map(|(label, url)| Node::Link {
                    label: label.clone(),
                    url: url.clone(),
                })
                .collect(),
            _ => Vec::new(),
        };
        Ok(nodes.into_iter().map(|n| self.alloc(n)).collect())
    }

    async fn locate_within(
        &mut self,
        parent: ElementHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, BrowserFault> {
        let Node::Row(key) = self.node(parent)? else {
            return Ok(Vec::new());
        };
        let row = self.row(&key)?.clone();
        let nodes: Vec<Node> = match selector {
            FIRST_CELL => row
                .first_cell
                .as_ref()
                .map(|_| Node::FirstCell(key.clone()))
                .into_iter()
                .collect(),
            CELL => (0..row.cells().len())
                .map(|col| Node::Cell(key.clone(), col))
                .collect(),
            MENU_TRIGGER if row.has_menu => vec![Node::MenuTrigger(key.clone())],
            _ => Vec::new(),
        };
        Ok(nodes.into_iter().map(|n| self.alloc(n)).collect())
    }

    async fn read_text(&mut self, handle: ElementHandle) -> Result<String, BrowserFault> {
        match self.node(handle)? {
            Node::Row(key) => {
                let row = self.row(&key)?;
                if row.unreadable {
                    return Err(BrowserFault::Protocol("node is detached from document".to_string()));
                }
                Ok(row.text.clone())
            }
            Node::FirstCell(key) => Ok(self.row(&key)?.first_cell.clone().unwrap_or_default()),
            Node::Cell(key, col) => Ok(self.row(&key)?.cells().get(col).cloned().unwrap_or_default()),
            Node::MenuItem { label, .. } => Ok(label),
            Node::Tooltip(text) => Ok(text),
            Node::Link { label, .. } => Ok(label),
            Node::MenuTrigger(_) => Ok("…".to_string()),
            Node::Field(_) => Ok(String::new()),
            Node::Submit => Ok("Log in".to_string()),
        }
    }

    async fn activate(&mut self, handle: ElementHandle) -> Result<(), BrowserFault> {
        match self.node(handle)? {
            Node::MenuTrigger(key) => {
                self.open_menu = Some(key);
                Ok(())
            }
            Node::MenuItem { row, label } => {
                let is_action = self.row(&row)?.action_label.as_deref() == Some(label.as_str());
                self.open_menu = None;
                if is_action {
                    self.remediate(&row)?;
                }
                Ok(())
            }
            Node::Submit => {
                self.submit_login();
                Ok(())
            }
            Node::Link { url, .. } => {
                self.url = url;
                self.replace_document();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn hover(&mut self, handle: ElementHandle) -> Result<(), BrowserFault> {
        match self.node(handle)? {
            Node::Row(key) | Node::Cell(key, _) | Node::FirstCell(key) => {
                self.hovered = Some(key);
            }
            _ => self.hovered = None,
        }
        Ok(())
    }

    async fn fill(&mut self, handle: ElementHandle, text: &str) -> Result<(), BrowserFault> {
        match self.node(handle)? {
            Node::Field(name) => {
                self.filled.insert(name, text.to_string());
                Ok(())
            }
            _ => Err(BrowserFault::Protocol("element is not an input".to_string())),
        }
    }

    async fn screenshot(&mut self, path: &Path, _full_page: bool) -> Result<PathBuf, BrowserFault> {
        self.ensure_open()?;
        if self.screenshot_fails {
            return Err(BrowserFault::Protocol("screenshot capture failed".to_string()));
        }
        tokio::fs::write(path, b"\x89PNG\r\n\x1a\nfake").await?;
        self.screenshots.push(path.to_path_buf());
        Ok(path.to_path_buf())
    }

    async fn close(&mut self) -> Result<(), BrowserFault> {
        self.close_calls += 1;
        self.closed = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// One report received by a [`RecordingSink`].
#[derive(Debug, Clone)]
pub struct Delivery {
    pub report: RunReport,
    pub attachments: Vec<Attachment>,
}

/// Sink that keeps every report it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, report: &RunReport, attachments: &[Attachment]) -> Result<(), NotifyError> {
        self.deliveries.lock().unwrap().push(Delivery {
            report: report.clone(),
            attachments: attachments.to_vec(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FailingSink
// ---------------------------------------------------------------------------

/// Sink whose every delivery fails with a transport error.
#[derive(Debug, Default)]
pub struct FailingSink {
    attempts: Mutex<usize>,
}

impl FailingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl NotificationSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    async fn send(&self, _report: &RunReport, _attachments: &[Attachment]) -> Result<(), NotifyError> {
        *self.attempts.lock().unwrap() += 1;
        Err(NotifyError::Transport("connection refused".to_string()))
    }
}
