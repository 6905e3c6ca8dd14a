//! Per-iteration routing plan produced by `split_data`.

use crate::data::container::Container;
use crate::redist_error::RedistError;
use bytes::Bytes;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// What one source sends to one destination.
#[derive(Debug, Clone)]
pub enum Route {
    Empty,
    /// `payload` is `None` for the chunk addressed to the local rank, which
    /// is handed over without serialization.
    Send {
        chunk: Container,
        payload: Option<Bytes>,
    },
}

impl Route {
    pub fn is_send(&self) -> bool {
        matches!(self, Route::Send { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoutingPlan {
    /// One route per destination.
    pub routes: Vec<Route>,
    /// 1 when a message goes over the transport to the destination.
    pub summarize_dest: Vec<i32>,
}

impl RoutingPlan {
    /// Serialize every chunk except the one for `self_dest`.
    pub fn build(
        chunks: Vec<Option<Container>>,
        self_dest: Option<usize>,
    ) -> Result<Self, RedistError> {
        let to_encode: Vec<(usize, &Container)> = chunks
            .iter()
            .enumerate()
            .filter(|(d, _)| Some(*d) != self_dest)
            .filter_map(|(d, c)| c.as_ref().map(|c| (d, c)))
            .collect();

        #[cfg(feature = "rayon")]
        let encoded: Result<Vec<(usize, Bytes)>, RedistError> = to_encode
            .par_iter()
            .map(|(d, c)| c.serialize().map(|b| (*d, b)))
            .collect();
        #[cfg(not(feature = "rayon"))]
        let encoded: Result<Vec<(usize, Bytes)>, RedistError> = to_encode
            .iter()
            .map(|(d, c)| c.serialize().map(|b| (*d, b)))
            .collect();

        let mut payloads: Vec<Option<Bytes>> = vec![None; chunks.len()];
        for (d, b) in encoded? {
            payloads[d] = Some(b);
        }
        Ok(Self::assemble(chunks, payloads, self_dest))
    }

    /// The same container to every destination; serialized once.
    pub fn replicate(
        data: &Container,
        nb_dests: usize,
        self_dest: Option<usize>,
    ) -> Result<Self, RedistError> {
        let bytes = data.serialize()?;
        let payloads = (0..nb_dests)
            .map(|d| (Some(d) != self_dest).then(|| bytes.clone()))
            .collect();
        Ok(Self::assemble(
            vec![Some(data.clone()); nb_dests],
            payloads,
            self_dest,
        ))
    }

    fn assemble(
        chunks: Vec<Option<Container>>,
        payloads: Vec<Option<Bytes>>,
        self_dest: Option<usize>,
    ) -> Self {
        let routes: Vec<Route> = chunks
            .into_iter()
            .zip(payloads)
            .map(|(c, payload)| match c {
                Some(chunk) => Route::Send { chunk, payload },
                None => Route::Empty,
            })
            .collect();
        let summarize_dest = routes
            .iter()
            .enumerate()
            .map(|(d, r)| i32::from(r.is_send() && Some(d) != self_dest))
            .collect();
        Self {
            routes,
            summarize_dest,
        }
    }
}
