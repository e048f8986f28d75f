use crate::config::Config;
use crate::dom::{Document, NodeId};
use crate::engine::{
    self, next_frame, ActivateHandler, ApplyKey, ApplyReport, Focus, FrameScheduler,
};
use crate::error::{MarginError, PermissionError, Result};
use crate::identity::{AdminPolicy, Identity};
use crate::models::{Annotation, AnnotationDraft, AnnotationType, Paragraph, ParagraphId, SortBy};
use crate::parsers::MarkdownRenderer;
use crate::selection::{NativeSelection, SelectionCapture};
use crate::store::AnnotationClient;
use crate::ui::notify::{user_message, Notifier};
use crate::ui::panel::{ComposeView, ListState, PanelView};
use crate::ui::toolbar::{share_link, Clipboard, Overlay, ResponseTarget, ToolbarAction, Viewport};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info};

/// Frames a focus pulse stays on its marks before a pass clears it.
pub const PULSE_FRAMES: u32 = 60;

/// One open article: its rendered content, the reader's selection and overlays,
/// the annotation list, and the apply pass that keeps marks in sync with both.
///
/// The article subtree is written by the renderer on content changes and by the
/// engine on frames; nothing else mutates it.
pub struct ArticleSession {
    config: Config,
    admins: AdminPolicy,
    post_id: String,
    renderer: MarkdownRenderer,
    doc: Document,
    container: NodeId,
    paragraphs: Vec<Paragraph>,
    capture: SelectionCapture,
    overlay: Overlay,
    compose: Option<ComposeView>,
    client: AnnotationClient,
    list: ListState,
    sort_by: SortBy,
    scheduler: FrameScheduler,
    content_revision: u64,
    annotations_revision: u64,
    activations: Rc<RefCell<Vec<String>>>,
    notifier: Notifier,
    clipboard: Box<dyn Clipboard>,
    last_report: Option<ApplyReport>,
    pending_focus: Option<(ParagraphId, String)>,
    focused: Option<Focus>,
    pulse_frames_left: u32,
}

impl ArticleSession {
    pub fn new(
        config: Config,
        client: AnnotationClient,
        post_id: &str,
        markdown: &str,
        clipboard: Box<dyn Clipboard>,
    ) -> Result<Self> {
        let renderer = MarkdownRenderer::new()?;
        let mut doc = Document::new();
        let container = doc.create_element("article");
        let body = doc.root();
        doc.append_child(body, container);
        let paragraphs = renderer.render_into(&mut doc, container, markdown);

        let mut session = Self {
            admins: AdminPolicy::new(&config.admin_emails),
            capture: SelectionCapture::from_config(&config),
            sort_by: config.default_sort,
            config,
            post_id: post_id.to_string(),
            renderer,
            doc,
            container,
            paragraphs,
            overlay: Overlay::default(),
            compose: None,
            client,
            list: ListState::Loading,
            scheduler: FrameScheduler::new(),
            content_revision: 1,
            annotations_revision: 0,
            activations: Rc::new(RefCell::new(Vec::new())),
            notifier: Notifier::new(),
            clipboard,
            last_report: None,
            pending_focus: None,
            focused: None,
            pulse_frames_left: 0,
        };
        session.schedule_apply();
        Ok(session)
    }

    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    pub fn doc(&self) -> &Document {
        &self.doc
    }

    pub fn container(&self) -> NodeId {
        self.container
    }

    /// Current article markup, marks included.
    pub fn html(&self) -> String {
        self.doc.inner_html(self.container)
    }

    pub fn paragraphs(&self) -> &[Paragraph] {
        &self.paragraphs
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn compose(&self) -> Option<&ComposeView> {
        self.compose.as_ref()
    }

    pub fn compose_mut(&mut self) -> Option<&mut ComposeView> {
        self.compose.as_mut()
    }

    pub fn list_state(&self) -> &ListState {
        &self.list
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn notifier_mut(&mut self) -> &mut Notifier {
        &mut self.notifier
    }

    /// The paragraph and marks of the last focused entry while its pulse runs.
    pub fn focused(&self) -> Option<&Focus> {
        self.focused.as_ref()
    }

    pub fn last_report(&self) -> Option<&ApplyReport> {
        self.last_report.as_ref()
    }

    pub fn apply_key(&self) -> ApplyKey {
        ApplyKey {
            content_revision: self.content_revision,
            annotations_revision: self.annotations_revision,
        }
    }

    fn schedule_apply(&mut self) {
        let key = self.apply_key();
        self.scheduler.request(key);
    }

    /// Re-renders the article from new markdown. Marks come back on the next frame.
    pub fn set_content(&mut self, markdown: &str) {
        self.paragraphs = self.renderer.render_into(&mut self.doc, self.container, markdown);
        self.content_revision += 1;
        self.capture.clear(None);
        if self.overlay.toolbar_selection().is_some() {
            self.overlay.close();
        }
        self.schedule_apply();
    }

    /// Runs the pending apply pass, if any. Called once per paint frame.
    pub fn on_frame(&mut self) -> Option<ApplyReport> {
        self.expire_pulse();
        let forced = self.scheduler.is_forced();
        let key = self.scheduler.on_frame()?;
        let queue = self.activations.clone();
        let on_activate: ActivateHandler = Rc::new(move |id: &str| queue.borrow_mut().push(id.to_string()));

        let report = engine::apply(&mut self.doc, self.container, self.list.annotations(), on_activate);
        debug!(
            "Apply pass for {:?} (forced: {}): {} mark(s), {} missing paragraph(s)",
            key,
            forced,
            report.marks,
            report.missing_paragraphs.len()
        );

        // the pass replaced every mark, so any running pulse is gone
        self.focused = None;
        self.pulse_frames_left = 0;
        if let Some((paragraph_id, annotation_id)) = self.pending_focus.take() {
            self.focused = engine::focus(&mut self.doc, self.container, &paragraph_id, Some(&annotation_id));
            if self.focused.is_some() {
                self.pulse_frames_left = PULSE_FRAMES;
            }
        }

        self.last_report = Some(report.clone());
        Some(report)
    }

    /// Counts down a running pulse; when it runs out, a pass over unchanged
    /// inputs puts the marks back without it.
    fn expire_pulse(&mut self) {
        if self.pulse_frames_left == 0 {
            return;
        }
        self.pulse_frames_left -= 1;
        if self.pulse_frames_left == 0 {
            let key = self.apply_key();
            self.scheduler.force(key);
        }
    }

    /// Waits for the next frame and runs whatever apply pass is due.
    pub async fn tick(&mut self) -> Option<ApplyReport> {
        next_frame().await;
        self.on_frame()
    }

    pub async fn load_annotations(&mut self) {
        self.list = ListState::Loading;
        let result = self.client.list(&self.post_id, self.sort_by).await;
        self.finish_load(result);
    }

    /// Fetches past the cache, for the retry affordance.
    pub async fn retry(&mut self) {
        self.list = ListState::Loading;
        let result = self.client.refresh(&self.post_id, self.sort_by).await;
        self.finish_load(result);
    }

    fn finish_load(&mut self, result: Result<Vec<Annotation>>) {
        match result {
            Ok(list) => {
                self.list = ListState::Ready(list);
                self.annotations_revision += 1;
                self.schedule_apply();
            }
            Err(e) => {
                self.notifier.error("Failed to load annotations", &e);
                self.list = ListState::Failed {
                    message: user_message(&e),
                };
            }
        }
    }

    pub async fn set_sort(&mut self, sort_by: SortBy) {
        if sort_by != self.sort_by {
            self.sort_by = sort_by;
            self.load_annotations().await;
        }
    }

    /// Swaps the reader after sign-in or sign-out.
    pub async fn set_identity(&mut self, identity: Identity) -> Result<()> {
        let caller = self.admins.caller(identity);
        self.client.set_caller(caller, &self.post_id)?;
        if let Some(compose) = self.compose.take() {
            self.compose = Some(self.compose_view(compose.target));
        }
        self.load_annotations().await;
        Ok(())
    }

    pub fn panel(&self) -> PanelView {
        PanelView::build(self.list.annotations(), self.client.caller(), self.sort_by, &self.paragraphs)
    }

    pub fn pointer_down(&mut self) {
        self.overlay.begin_selecting();
    }

    /// Re-reads the native selection once the pointer is released.
    pub fn pointer_up(&mut self, native: Option<NativeSelection>, viewport: &Viewport) {
        let selection = self.capture.observe(&self.doc, self.container, native).cloned();
        self.overlay.selection_settled(selection.as_ref(), viewport);
    }

    pub async fn toolbar_action(&mut self, action: ToolbarAction, native: Option<NativeSelection>) {
        let Some(selection) = self.overlay.toolbar_selection().cloned() else {
            return;
        };

        match action {
            ToolbarAction::Highlight => {
                let draft = AnnotationDraft::from_selection(AnnotationType::Highlight, &selection);
                match self.client.create(&self.post_id, &draft).await {
                    Ok(_) => {
                        self.capture.clear(native);
                        self.overlay.close();
                        self.load_annotations().await;
                    }
                    Err(e) => {
                        self.notifier.error("Failed to save highlight", &e);
                    }
                }
            }
            ToolbarAction::Respond => {
                self.capture.clear(native);
                let target = ResponseTarget::Selection(selection);
                self.compose = Some(self.compose_view(target.clone()));
                self.overlay.open_response(target);
            }
            ToolbarAction::Note => {
                self.capture.clear(native);
                self.compose = None;
                self.overlay.open_note(selection);
            }
            ToolbarAction::Share => {
                let link = share_link(&self.config.site_base_url, &self.post_id, &selection.text);
                match self.clipboard.write_text(&link) {
                    Ok(()) => {
                        self.capture.clear(native);
                        self.overlay.close();
                        self.notifier.success("Link copied to clipboard");
                    }
                    Err(e) => {
                        self.notifier.error("Failed to copy link", &e);
                    }
                }
            }
        }
    }

    fn compose_view(&self, target: ResponseTarget) -> ComposeView {
        ComposeView::new(
            target,
            self.client.caller(),
            self.config.quote_preview_chars,
            self.config.max_content_chars,
        )
    }

    pub fn close_overlay(&mut self) {
        self.overlay.close();
        self.compose = None;
    }

    /// Saves the note being composed. On failure the compose box stays open.
    pub async fn submit_note(&mut self, body: &str) -> Result<Annotation> {
        let Overlay::ComposeNote { selection } = &self.overlay else {
            return Err(MarginError::InvalidArgument("No note is being composed".to_string()));
        };
        let body = body.trim();
        if body.is_empty() || body.chars().count() > self.config.max_content_chars {
            let err = MarginError::InvalidArgument(format!(
                "Notes need 1 to {} characters",
                self.config.max_content_chars
            ));
            self.notifier.error("Note not saved", &err);
            return Err(err);
        }

        let draft = AnnotationDraft::from_selection(AnnotationType::Note, selection).with_content(body);
        match self.client.create(&self.post_id, &draft).await {
            Ok(created) => {
                self.notifier.success("Note saved");
                self.overlay.close();
                self.load_annotations().await;
                Ok(created)
            }
            Err(e) => {
                self.notifier.error("Failed to save note", &e);
                Err(e)
            }
        }
    }

    /// Posts the response being composed. Anonymous readers get the sign-in gate
    /// rather than a notification.
    pub async fn submit_response(&mut self) -> Result<Annotation> {
        let Some(compose) = &self.compose else {
            return Err(MarginError::InvalidArgument("No response is being composed".to_string()));
        };
        let draft = match compose.draft() {
            Ok(draft) => draft,
            Err(e @ MarginError::Permission(PermissionError::AuthenticationRequired)) => return Err(e),
            Err(e) => {
                self.notifier.error("Response not posted", &e);
                return Err(e);
            }
        };

        match self.client.create(&self.post_id, &draft).await {
            Ok(created) => {
                self.notifier.success("Response posted!");
                self.load_annotations().await;
                let target = match &created.parent_annotation_id {
                    Some(_) => self.compose.as_ref().map(|c| c.target.clone()),
                    None => Some(ResponseTarget::Thread(Box::new(created.clone()))),
                };
                if let Some(target) = target {
                    self.open_thread_compose(target).await;
                }
                Ok(created)
            }
            Err(e) => {
                self.notifier.error("Failed to submit response", &e);
                Err(e)
            }
        }
    }

    /// Dispatches a click on an article node to any mark listeners.
    pub fn click(&mut self, node: NodeId) -> usize {
        self.doc.click(node)
    }

    /// Handles mark clicks queued since the last call. Responses open their
    /// thread; other marks pulse on the next frame. Returns the activated id.
    pub async fn drain_activations(&mut self) -> Option<String> {
        let ids: Vec<String> = self.activations.borrow_mut().drain(..).collect();
        let id = ids.last()?;
        let target = self.list.annotations().iter().find(|a| &a.id == id)?.clone();

        if target.kind == AnnotationType::Response && target.has_body() {
            self.open_thread_compose(ResponseTarget::Thread(Box::new(target.clone()))).await;
        } else {
            self.request_focus(&target);
        }
        Some(target.id)
    }

    /// Pulses the marks behind a panel entry on the next frame.
    pub fn focus_entry(&mut self, annotation_id: &str) -> bool {
        let Some(target) = self
            .list
            .annotations()
            .iter()
            .find(|a| a.id == annotation_id)
            .cloned()
        else {
            return false;
        };
        self.request_focus(&target);
        true
    }

    fn request_focus(&mut self, target: &Annotation) {
        self.pending_focus = Some((target.paragraph_id.clone(), target.id.clone()));
        let key = self.apply_key();
        self.scheduler.force(key);
    }

    async fn open_thread_compose(&mut self, target: ResponseTarget) {
        let mut view = self.compose_view(target.clone());
        if let ResponseTarget::Thread(root) = &target {
            match self.client.list_replies(&self.post_id, &root.id).await {
                Ok(mut thread) => {
                    thread.push((**root).clone());
                    view = view.with_thread(&thread, self.client.caller());
                }
                Err(e) => {
                    self.notifier.error("Failed to load replies", &e);
                }
            }
        }
        self.compose = Some(view);
        self.overlay.open_response(target);
    }

    /// Rebuilds an open thread from the freshly loaded list so its replies and
    /// like counts match the store. Closes it when the root is gone.
    async fn refresh_thread(&mut self) {
        let Some(root_id) = self
            .compose
            .as_ref()
            .and_then(|c| c.target.thread_id())
            .map(str::to_string)
        else {
            return;
        };
        if !matches!(self.list, ListState::Ready(_)) {
            return;
        }

        let root = self.list.annotations().iter().find(|a| a.id == root_id).cloned();
        match root {
            Some(root) => {
                let body = self.compose.as_ref().map(|c| c.body.clone()).unwrap_or_default();
                self.open_thread_compose(ResponseTarget::Thread(Box::new(root))).await;
                if let Some(compose) = self.compose.as_mut() {
                    compose.set_body(&body);
                }
            }
            None => self.close_overlay(),
        }
    }

    pub async fn toggle_like(&mut self, annotation_id: &str) {
        match self.client.toggle_like(&self.post_id, annotation_id).await {
            Ok(state) => {
                debug!("Like on {} is now {}", annotation_id, state.liked);
                self.load_annotations().await;
                self.refresh_thread().await;
            }
            Err(e) => {
                self.notifier.error("Failed to update like", &e);
            }
        }
    }

    pub async fn delete(&mut self, annotation_id: &str) {
        match self.client.delete(&self.post_id, annotation_id).await {
            Ok(()) => {
                info!("Annotation {} deleted", annotation_id);
                self.notifier.success("Annotation deleted");
                self.load_annotations().await;
                self.refresh_thread().await;
            }
            Err(e) => {
                self.notifier.error("Failed to delete annotation", &e);
            }
        }
    }
}
