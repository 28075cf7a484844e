use glam::{Mat4, Vec3};
use std::ffi::CString;
use std::ptr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("vertex shader compilation failed: {0}")]
    VertexCompile(String),
    #[error("fragment shader compilation failed: {0}")]
    FragmentCompile(String),
    #[error("shader program linking failed: {0}")]
    Link(String),
}

/// Thin wrapper over one GL shader program. The chunk passes receive their
/// shader sources from the embedder; this only compiles, links and uploads
/// uniforms.
pub struct ShaderProgram {
    id: u32,
}

impl ShaderProgram {
    pub fn new(vertex_src: &str, fragment_src: &str) -> Result<Self, ShaderError> {
        unsafe {
            let vertex = compile(gl::VERTEX_SHADER, vertex_src)
                .map_err(ShaderError::VertexCompile)?;
            let fragment = match compile(gl::FRAGMENT_SHADER, fragment_src) {
                Ok(fragment) => fragment,
                Err(log) => {
                    gl::DeleteShader(vertex);
                    return Err(ShaderError::FragmentCompile(log));
                }
            };

            let id = gl::CreateProgram();
            gl::AttachShader(id, vertex);
            gl::AttachShader(id, fragment);
            gl::LinkProgram(id);

            let mut success = gl::FALSE as gl::types::GLint;
            gl::GetProgramiv(id, gl::LINK_STATUS, &mut success);
            gl::DeleteShader(vertex);
            gl::DeleteShader(fragment);
            if success != gl::TRUE as gl::types::GLint {
                let log = info_log(id, true);
                gl::DeleteProgram(id);
                return Err(ShaderError::Link(log));
            }

            Ok(Self { id })
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn bind(&self) {
        unsafe {
            gl::UseProgram(self.id);
        }
    }

    fn location(&self, name: &str) -> i32 {
        let c_name = CString::new(name).expect("uniform name");
        unsafe { gl::GetUniformLocation(self.id, c_name.as_ptr()) }
    }

    pub fn set_mat4(&self, name: &str, value: &Mat4) {
        unsafe {
            gl::UniformMatrix4fv(
                self.location(name),
                1,
                gl::FALSE,
                value.to_cols_array().as_ptr(),
            );
        }
    }

    pub fn set_vec3(&self, name: &str, value: Vec3) {
        unsafe {
            gl::Uniform3f(self.location(name), value.x, value.y, value.z);
        }
    }

    pub fn set_int(&self, name: &str, value: i32) {
        unsafe {
            gl::Uniform1i(self.location(name), value);
        }
    }
}

impl Drop for ShaderProgram {
    fn drop(&mut self) {
        unsafe {
            gl::DeleteProgram(self.id);
        }
    }
}

unsafe fn compile(kind: gl::types::GLenum, source: &str) -> Result<u32, String> {
    let shader = gl::CreateShader(kind);
    let c_source = CString::new(source).map_err(|_| "source contains NUL".to_string())?;
    gl::ShaderSource(shader, 1, &c_source.as_ptr(), ptr::null());
    gl::CompileShader(shader);

    let mut success = gl::FALSE as gl::types::GLint;
    gl::GetShaderiv(shader, gl::COMPILE_STATUS, &mut success);
    if success != gl::TRUE as gl::types::GLint {
        let log = info_log(shader, false);
        gl::DeleteShader(shader);
        return Err(log);
    }
    Ok(shader)
}

unsafe fn info_log(object: u32, is_program: bool) -> String {
    let mut length = 0;
    if is_program {
        gl::GetProgramiv(object, gl::INFO_LOG_LENGTH, &mut length);
    } else {
        gl::GetShaderiv(object, gl::INFO_LOG_LENGTH, &mut length);
    }
    let mut buffer = vec![0u8; length.max(1) as usize];
    let mut written = 0;
    if is_program {
        gl::GetProgramInfoLog(
            object,
            length,
            &mut written,
            buffer.as_mut_ptr() as *mut gl::types::GLchar,
        );
    } else {
        gl::GetShaderInfoLog(
            object,
            length,
            &mut written,
            buffer.as_mut_ptr() as *mut gl::types::GLchar,
        );
    }
    buffer.truncate(written.max(0) as usize);
    String::from_utf8_lossy(&buffer).into_owned()
}
