use super::{header_name, set_or_remove_header};
use crate::proxychain::{response_modifier, ResponseModifier};
use hyper::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_EXPOSE_HEADERS, CONTENT_SECURITY_POLICY, CONTENT_SECURITY_POLICY_REPORT_ONLY,
};

/// Set a response header. An empty `value` removes it.
pub fn modify_response_header(
    name: impl Into<String>,
    value: impl Into<String>,
) -> ResponseModifier {
    let name = name.into();
    let value = value.into();
    response_modifier(move |chain| {
        set_or_remove_header(&mut chain.response_mut()?.headers, &name, &value)
    })
}

pub fn delete_response_header(name: impl Into<String>) -> ResponseModifier {
    let name = name.into();
    response_modifier(move |chain| {
        let header = header_name(&name)?;
        chain.response_mut()?.headers.remove(header);
        Ok(())
    })
}

/// Let the browser read the response from any origin.
pub fn bypass_cors() -> ResponseModifier {
    response_modifier(|chain| {
        chain.add_response_modifiers([
            modify_response_header(ACCESS_CONTROL_ALLOW_ORIGIN.as_str(), "*"),
            modify_response_header(ACCESS_CONTROL_EXPOSE_HEADERS.as_str(), "*"),
            modify_response_header(ACCESS_CONTROL_ALLOW_CREDENTIALS.as_str(), "true"),
            modify_response_header(ACCESS_CONTROL_ALLOW_METHODS.as_str(), ""),
        ]);
        Ok(())
    })
}

/// Drop the content security policy so rewritten pages can load their assets
/// through the proxy.
pub fn bypass_csp() -> ResponseModifier {
    response_modifier(|chain| {
        let headers = &mut chain.response_mut()?.headers;
        headers.remove(CONTENT_SECURITY_POLICY);
        headers.remove(CONTENT_SECURITY_POLICY_REPORT_ONLY);
        Ok(())
    })
}
