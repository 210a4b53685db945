//! Kernel stand-in for mirror documents: execution happens on the host.

use std::sync::Arc;

use nbshare_common::{Result, UriComponents, UriMapper};
use tracing::debug;

use crate::channel::SharedServiceProxy;
use crate::protocol::Request;

/// Forwards execution requests for one mirror view type to the host.
///
/// Every call is fire-and-forget. Results come back as cell-outputs
/// notifications, not as responses.
pub struct MirrorKernel {
    view_type: String,
    proxy: SharedServiceProxy,
    mapper: Arc<dyn UriMapper>,
}

impl MirrorKernel {
    pub fn new(
        view_type: impl Into<String>,
        proxy: SharedServiceProxy,
        mapper: Arc<dyn UriMapper>,
    ) -> Self {
        Self {
            view_type: view_type.into(),
            proxy,
            mapper,
        }
    }

    pub fn view_type(&self) -> &str {
        &self.view_type
    }

    pub fn execute_cell(
        &self,
        document: &UriComponents,
        cell: &UriComponents,
        index: usize,
    ) -> Result<()> {
        debug!(view_type = %self.view_type, %document, index, "Execute cell");
        self.proxy.send_detached(Request::ExecuteCell(
            self.view_type.clone(),
            self.mapper.to_shared(document),
            self.mapper.to_shared(cell),
            index,
        ))
    }

    pub fn cancel_cell(
        &self,
        document: &UriComponents,
        cell: &UriComponents,
        index: usize,
    ) -> Result<()> {
        self.proxy.send_detached(Request::CancelExecuteCell(
            self.view_type.clone(),
            self.mapper.to_shared(document),
            self.mapper.to_shared(cell),
            index,
        ))
    }

    pub fn execute_document(&self, document: &UriComponents) -> Result<()> {
        debug!(view_type = %self.view_type, %document, "Execute document");
        self.proxy.send_detached(Request::ExecuteDocument(
            self.view_type.clone(),
            self.mapper.to_shared(document),
        ))
    }

    pub fn cancel_document(&self, document: &UriComponents) -> Result<()> {
        self.proxy.send_detached(Request::CancelExecuteDocument(
            self.view_type.clone(),
            self.mapper.to_shared(document),
        ))
    }
}
