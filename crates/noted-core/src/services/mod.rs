//! The actor services behind this server's cloneable handles: a
//! session registry for reaching a subscriber's outbound sink by id,
//! and a doc registry owning one `DocEngine` worker per open summary.

pub mod doc_engine;
pub mod sessions;

#[cfg(test)]
mod tests;
