//! Boundary to the clause-retrieval and explanation collaborators.
//!
//! The trainer never depends on these: queries are built only after a bid is
//! finalized, retrieval feeds nothing back into training, and a collaborator
//! failure leaves the bid standing with the grounding annotation omitted.

use log::warn;
use serde::Serialize;
use thiserror::Error;

use crate::env::{Bid, MarketState};
use crate::treaty::Peril;
use crate::types::TreatyId;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClauseTopic {
    LayerStructure,
    Cession,
    Pricing,
    CatastropheExclusion,
}

/// A retrieval request derived from a finalized bid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClauseQuery {
    pub treaty_id: TreatyId,
    pub peril: Peril,
    pub topic: ClauseTopic,
    pub text: String,
}

/// A clause identifier with its relevance score, as ranked by the retriever.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedClause {
    pub clause_id: String,
    pub score: f64,
}

/// The finalized tuple handed read-only to the explanation generator.
#[derive(Debug, Clone, Serialize)]
pub struct ExplanationRequest {
    pub state: MarketState,
    pub bid: Bid,
    pub clauses: Vec<RetrievedClause>,
}

pub trait ClauseRetriever {
    fn retrieve(&self, queries: &[ClauseQuery]) -> Result<Vec<RetrievedClause>, CollaboratorError>;
}

pub trait ExplanationSink {
    fn explain(&mut self, request: &ExplanationRequest) -> Result<(), CollaboratorError>;
}

/// Build the clause queries for a finalized `(state, bid)` pair. One query
/// per contract dimension the bid actually exercises.
pub fn clause_queries(state: &MarketState, bid: &Bid) -> Vec<ClauseQuery> {
    let mut queries = vec![ClauseQuery {
        treaty_id: state.treaty_id,
        peril: state.peril,
        topic: ClauseTopic::Pricing,
        text: format!("rate on line {:.4} for {:?} exposure", bid.price, state.peril),
    }];
    if bid.cession > 0.0 {
        queries.push(ClauseQuery {
            treaty_id: state.treaty_id,
            peril: state.peril,
            topic: ClauseTopic::Cession,
            text: format!("cession of {:.1}% of the subject layer", bid.cession * 100.0),
        });
        queries.push(ClauseQuery {
            treaty_id: state.treaty_id,
            peril: state.peril,
            topic: ClauseTopic::LayerStructure,
            text: format!(
                "excess of loss layer attaching at {:.2} up to {:.2} of subject exposure",
                bid.attachment, bid.limit
            ),
        });
    }
    if matches!(state.peril, Peril::WindstormAtlantic | Peril::EarthquakeUS) {
        queries.push(ClauseQuery {
            treaty_id: state.treaty_id,
            peril: state.peril,
            topic: ClauseTopic::CatastropheExclusion,
            text: format!("catastrophe event definition for {:?}", state.peril),
        });
    }
    queries
}

/// Retrieve grounding clauses for a finalized bid. Retrieval failure (or an
/// empty result) must not fail the bid, so this degrades to an empty
/// annotation and logs the cause.
pub fn annotate_bid(
    retriever: &dyn ClauseRetriever,
    state: &MarketState,
    bid: &Bid,
) -> Vec<RetrievedClause> {
    let queries = clause_queries(state, bid);
    match retriever.retrieve(&queries) {
        Ok(clauses) => clauses,
        Err(e) => {
            warn!("clause retrieval failed, bid stands ungrounded: {e}");
            Vec::new()
        }
    }
}

/// Hand the finalized tuple to the explanation generator without blocking on
/// or propagating its failure.
pub fn offer_explanation(sink: &mut dyn ExplanationSink, request: &ExplanationRequest) {
    if let Err(e) = sink.explain(request) {
        warn!("explanation generation failed, ignored: {e}");
    }
}
