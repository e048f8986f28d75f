mod annotation;
mod paragraph;
mod selection;

pub use annotation::{
    sort_annotations, Anchor, Annotation, AnnotationDraft, AnnotationType, LikeState, SortBy,
};
pub use paragraph::{Paragraph, ParagraphId};
pub use selection::{Rect, SelectionDescriptor};
