//! Expression-template reverse-mode AD for scalar computations.
//!
//! Arithmetic on [`Variable`](variable::Variable)s builds typed node trees;
//! assigning a tree records one entry on this thread's tape. The reverse
//! sweeps then accumulate exact first-, second- and third-order adjoints of
//! the seeded output with respect to every recorded leaf.
//!
//! ```
//! use rustgrad::prelude::*;
//!
//! reset_tape();
//! set_trace_level(TraceLevel::SecondOrderMixed);
//! let x = Variable::new(3.0);
//! let y = Variable::new(2.0);
//! let mut z = Variable::new(0.0);
//! z.assign(&x * &y + sin(&x));
//!
//! let vars = vec![x.clone(), y.clone()];
//! let (mut g, mut h) = (Vec::new(), Vec::new());
//! compute_gradient_and_hessian(&vars, &mut g, &mut h).unwrap();
//! assert!((g[0] - (2.0 + 3.0f64.cos())).abs() < 1e-12);
//! assert!((h[0][1] - 1.0).abs() < 1e-12);
//! ```

pub mod expr;
pub mod graph;
pub mod prelude;
pub mod tape;
pub mod transform;
pub mod utils;
pub mod variable;
