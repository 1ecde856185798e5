mod attribute_view;
mod listen_view;
mod painter;
mod scan_view;
mod table;

pub(crate) use self::attribute_view::AttributeView;
pub(crate) use self::listen_view::{ListenSummaryView, NotificationView};
pub(crate) use self::painter::Painter;
pub(crate) use self::scan_view::{BackendCheckView, ScanView};
